//! Client configuration
//!
//! Plain-data defaults for queries and observers, loadable from JSON:
//!
//! ```json
//! {
//!   "defaults": { "stale_time_ms": 5000, "retry": 2 },
//!   "key_defaults": [
//!     { "key": ["todos"], "defaults": { "refetch_on_window_focus": "always" } }
//!   ]
//! }
//! ```
//!
//! Durations are milliseconds; `u64::MAX` means "forever".

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::observer::{ObserverOptions, RefetchOn, RefetchInterval};
use crate::query::{QueryKey, QueryOptions, Retry, RetryDelay};

/// `true` retries forever, `false` never, a number caps the attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrySetting {
    Enabled(bool),
    Times(u32),
}

impl<E> From<RetrySetting> for Retry<E> {
    fn from(setting: RetrySetting) -> Self {
        match setting {
            RetrySetting::Enabled(enabled) => enabled.into(),
            RetrySetting::Times(limit) => Retry::Times(limit),
        }
    }
}

fn duration_ms(ms: u64) -> Duration {
    if ms == u64::MAX {
        Duration::MAX
    } else {
        Duration::from_millis(ms)
    }
}

/// Defaults applied to options that leave a field unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryDefaults {
    pub stale_time_ms: Option<u64>,
    pub cache_time_ms: Option<u64>,
    pub retry: Option<RetrySetting>,
    pub retry_delay_ms: Option<u64>,
    pub enabled: Option<bool>,
    pub refetch_on_window_focus: Option<RefetchOn>,
    pub refetch_on_reconnect: Option<RefetchOn>,
    pub refetch_on_mount: Option<RefetchOn>,
    pub retry_on_mount: Option<bool>,
    pub refetch_interval_ms: Option<u64>,
    pub refetch_interval_in_background: Option<bool>,
    pub keep_previous_data: Option<bool>,
    pub structural_sharing: Option<bool>,
    pub optimistic_result: Option<bool>,
}

impl QueryDefaults {
    /// Layer `self` over `fallback`; fields set in `self` win.
    pub fn merge(&self, fallback: &QueryDefaults) -> QueryDefaults {
        QueryDefaults {
            stale_time_ms: self.stale_time_ms.or(fallback.stale_time_ms),
            cache_time_ms: self.cache_time_ms.or(fallback.cache_time_ms),
            retry: self.retry.or(fallback.retry),
            retry_delay_ms: self.retry_delay_ms.or(fallback.retry_delay_ms),
            enabled: self.enabled.or(fallback.enabled),
            refetch_on_window_focus: self.refetch_on_window_focus.or(fallback.refetch_on_window_focus),
            refetch_on_reconnect: self.refetch_on_reconnect.or(fallback.refetch_on_reconnect),
            refetch_on_mount: self.refetch_on_mount.or(fallback.refetch_on_mount),
            retry_on_mount: self.retry_on_mount.or(fallback.retry_on_mount),
            refetch_interval_ms: self.refetch_interval_ms.or(fallback.refetch_interval_ms),
            refetch_interval_in_background: self
                .refetch_interval_in_background
                .or(fallback.refetch_interval_in_background),
            keep_previous_data: self.keep_previous_data.or(fallback.keep_previous_data),
            structural_sharing: self.structural_sharing.or(fallback.structural_sharing),
            optimistic_result: self.optimistic_result.or(fallback.optimistic_result),
        }
    }

    /// Fill unset entry options.
    pub fn apply_to_query<T, E>(&self, options: &mut QueryOptions<T, E>) {
        if options.cache_time.is_none() {
            options.cache_time = self.cache_time_ms.map(duration_ms);
        }
        if options.retry.is_none() {
            options.retry = self.retry.map(Retry::from);
        }
        if options.retry_delay.is_none() {
            options.retry_delay = self
                .retry_delay_ms
                .map(|ms| RetryDelay::Fixed(Duration::from_millis(ms)));
        }
        if options.structural_sharing.is_none() {
            options.structural_sharing = self.structural_sharing;
        }
    }

    /// Fill unset observer options, including the entry options.
    pub fn apply_to_observer<T, E, S>(&self, options: &mut ObserverOptions<T, E, S>) {
        self.apply_to_query(&mut options.query);

        options.enabled = options.enabled.or(self.enabled);
        options.stale_time = options.stale_time.or(self.stale_time_ms.map(duration_ms));
        options.refetch_on_window_focus = options.refetch_on_window_focus.or(self.refetch_on_window_focus);
        options.refetch_on_reconnect = options.refetch_on_reconnect.or(self.refetch_on_reconnect);
        options.refetch_on_mount = options.refetch_on_mount.or(self.refetch_on_mount);
        options.retry_on_mount = options.retry_on_mount.or(self.retry_on_mount);
        options.refetch_interval_in_background = options
            .refetch_interval_in_background
            .or(self.refetch_interval_in_background);
        options.keep_previous_data = options.keep_previous_data.or(self.keep_previous_data);
        options.optimistic_result = options.optimistic_result.or(self.optimistic_result);

        if options.refetch_interval.is_none() {
            options.refetch_interval = self
                .refetch_interval_ms
                .map(|ms| RefetchInterval::Every(Duration::from_millis(ms)));
        }
    }
}

/// Defaults for every key that partially matches `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedDefaults {
    pub key: QueryKey,
    pub defaults: QueryDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub defaults: QueryDefaults,
    pub key_defaults: Vec<KeyedDefaults>,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

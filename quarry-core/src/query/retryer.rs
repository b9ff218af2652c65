//! Retry Engine
//!
//! A [`Retryer`] drives one fetch operation to a terminal result:
//!
//! 1. The operation is invoked as soon as the run starts. The returned
//!    [`Attempt`] may carry a transport cancel hook.
//!
//! 2. A failed attempt is retried while the [`Retry`] policy allows it,
//!    after waiting the [`RetryDelay`]. If the app is unfocused or offline
//!    once the delay elapses, the run pauses until [`Retryer::resume`].
//!
//! 3. The first terminal outcome wins. Success, exhaustion and cancellation
//!    all go through the same idempotent resolve step, so exactly one of
//!    `on_success` / `on_error` runs per run.
//!
//! The run is a small state machine (`Running`, `Paused`, `Resolved`)
//! driven by a Tokio task. All waiters share one [`PendingResult`].

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::error::{CancelledError, QueryError};
use crate::runtime::clock::millis;
use crate::runtime::Runtime;

/// Result shared by every caller waiting on one run.
pub type PendingResult<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, QueryError<E>>>>;

/// How to cancel a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOptions {
    /// Roll the entry back to its state before the fetch.
    pub revert: bool,
    /// Do not record the cancellation as an error.
    pub silent: bool,
}

impl CancelOptions {
    pub fn revert() -> Self {
        Self {
            revert: true,
            silent: false,
        }
    }

    pub fn silent() -> Self {
        Self {
            revert: false,
            silent: true,
        }
    }
}

impl From<CancelOptions> for CancelledError {
    fn from(options: CancelOptions) -> Self {
        CancelledError {
            revert: options.revert,
            silent: options.silent,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(u32, &QueryError<E>) -> bool + Send + Sync>;
type DelayFn<E> = Arc<dyn Fn(u32, &QueryError<E>) -> Duration + Send + Sync>;

/// Whether a failed attempt should be retried.
pub enum Retry<E> {
    Never,
    Always,
    /// Retry while fewer than `n` attempts have failed.
    Times(u32),
    When(RetryPredicate<E>),
}

impl<E> Retry<E> {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(u32, &QueryError<E>) -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate))
    }

    pub fn should_retry(&self, failure_count: u32, error: &QueryError<E>) -> bool {
        match self {
            Retry::Never => false,
            Retry::Always => true,
            Retry::Times(limit) => failure_count < *limit,
            Retry::When(predicate) => predicate(failure_count, error),
        }
    }
}

impl<E> Default for Retry<E> {
    fn default() -> Self {
        Retry::Times(3)
    }
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        match self {
            Retry::Never => Retry::Never,
            Retry::Always => Retry::Always,
            Retry::Times(limit) => Retry::Times(*limit),
            Retry::When(predicate) => Retry::When(Arc::clone(predicate)),
        }
    }
}

impl<E> fmt::Debug for Retry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retry::Never => f.write_str("Never"),
            Retry::Always => f.write_str("Always"),
            Retry::Times(limit) => f.debug_tuple("Times").field(limit).finish(),
            Retry::When(_) => f.write_str("When(..)"),
        }
    }
}

impl<E> From<bool> for Retry<E> {
    fn from(retry: bool) -> Self {
        if retry {
            Retry::Always
        } else {
            Retry::Never
        }
    }
}

impl<E> From<u32> for Retry<E> {
    fn from(limit: u32) -> Self {
        Retry::Times(limit)
    }
}

/// How long to wait before the next attempt.
pub enum RetryDelay<E> {
    /// `min(1s * 2^failures, 30s)`.
    Exponential,
    Fixed(Duration),
    With(DelayFn<E>),
}

impl<E> RetryDelay<E> {
    pub fn with<F>(delay: F) -> Self
    where
        F: Fn(u32, &QueryError<E>) -> Duration + Send + Sync + 'static,
    {
        Self::With(Arc::new(delay))
    }

    pub fn delay(&self, failure_count: u32, error: &QueryError<E>) -> Duration {
        match self {
            RetryDelay::Exponential => default_retry_delay(failure_count),
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::With(delay) => delay(failure_count, error),
        }
    }
}

pub fn default_retry_delay(failure_count: u32) -> Duration {
    let millis = 1000_u64.saturating_mul(2_u64.saturating_pow(failure_count));
    Duration::from_millis(millis.min(30_000))
}

impl<E> Default for RetryDelay<E> {
    fn default() -> Self {
        RetryDelay::Exponential
    }
}

impl<E> Clone for RetryDelay<E> {
    fn clone(&self) -> Self {
        match self {
            RetryDelay::Exponential => RetryDelay::Exponential,
            RetryDelay::Fixed(delay) => RetryDelay::Fixed(*delay),
            RetryDelay::With(delay) => RetryDelay::With(Arc::clone(delay)),
        }
    }
}

impl<E> fmt::Debug for RetryDelay<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Exponential => f.write_str("Exponential"),
            RetryDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            RetryDelay::With(_) => f.write_str("With(..)"),
        }
    }
}

/// One invocation of a fetch operation.
pub struct Attempt<T, E> {
    future: BoxFuture<'static, Result<T, QueryError<E>>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<T: Send + 'static, E: Send + Sync + 'static> Attempt<T, E> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            future: future.map(|result| result.map_err(QueryError::fetch)).boxed(),
            cancel: None,
        }
    }

    /// An attempt that has already failed.
    pub fn failed(error: QueryError<E>) -> Self {
        Self {
            future: futures_util::future::ready(Err(error)).boxed(),
            cancel: None,
        }
    }

    /// Attach a hook that cancels the underlying transport.
    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel = Some(Box::new(cancel));
        self
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancel.is_some()
    }
}

type Operation<T, E> = Arc<dyn Fn() -> Attempt<T, E> + Send + Sync>;

/// Everything a run needs.
pub struct RetryerConfig<T, E> {
    pub operation: Operation<T, E>,
    pub abort: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(Arc<T>) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(QueryError<E>) + Send + Sync>>,
    pub on_fail: Option<Arc<dyn Fn(u32, &QueryError<E>) + Send + Sync>>,
    pub on_pause: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_continue: Option<Arc<dyn Fn() + Send + Sync>>,
    pub retry: Retry<E>,
    pub retry_delay: RetryDelay<E>,
    pub runtime: Runtime,
}

impl<T, E> RetryerConfig<T, E> {
    pub fn new<F>(runtime: Runtime, operation: F) -> Self
    where
        F: Fn() -> Attempt<T, E> + Send + Sync + 'static,
    {
        Self {
            operation: Arc::new(operation),
            abort: None,
            on_success: None,
            on_error: None,
            on_fail: None,
            on_pause: None,
            on_continue: None,
            retry: Retry::default(),
            retry_delay: RetryDelay::default(),
            runtime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Paused,
    Resolved,
}

struct RunState<T, E> {
    phase: Phase,
    failure_count: u32,
    cancel_retry: bool,
    transport_cancelable: bool,
    transport_cancel: Option<Box<dyn FnOnce() + Send>>,
    sender: Option<oneshot::Sender<Result<Arc<T>, QueryError<E>>>>,
}

struct Run<T, E> {
    config: RetryerConfig<T, E>,
    state: Mutex<RunState<T, E>>,
    /// Wakes the driver when the run resolves from outside.
    halted: Notify,
    /// Wakes a paused driver.
    wake: Notify,
}

/// Handle to one fetch run.
pub struct Retryer<T, E> {
    run: Arc<Run<T, E>>,
    result: PendingResult<T, E>,
}

impl<T, E> Clone for Retryer<T, E> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            result: self.result.clone(),
        }
    }
}

impl<T, E> Retryer<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Start a run. Invokes the operation immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(config: RetryerConfig<T, E>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let run = Arc::new(Run {
            config,
            state: Mutex::new(RunState {
                phase: Phase::Running,
                failure_count: 0,
                cancel_retry: false,
                transport_cancelable: false,
                transport_cancel: None,
                sender: Some(sender),
            }),
            halted: Notify::new(),
            wake: Notify::new(),
        });

        let result: PendingResult<T, E> = async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(CancelledError::default().into()))
        }
        .boxed()
        .shared();

        let first = run.invoke();
        tokio::spawn(Arc::clone(&run).drive(first));

        Self { run, result }
    }

    /// Reject with a cancellation error and stop the run.
    pub fn cancel(&self, options: CancelOptions) {
        let run = &self.run;
        if !run.resolve(Err(CancelledError::from(options).into())) {
            return;
        }

        if let Some(abort) = &run.config.abort {
            abort();
        }

        let transport_cancel = run.state.lock().transport_cancel.take();
        if let Some(cancel) = transport_cancel {
            if catch_unwind(AssertUnwindSafe(cancel)).is_err() {
                tracing::debug!("transport cancel hook panicked");
            }
        }

        run.halted.notify_one();
    }

    /// Let the current attempt finish but never retry it.
    pub fn cancel_retry(&self) {
        self.run.state.lock().cancel_retry = true;
    }

    /// Wake a paused run.
    pub fn resume(&self) {
        if self.run.state.lock().phase == Phase::Paused {
            self.run.wake.notify_one();
        }
    }

    pub fn is_transport_cancelable(&self) -> bool {
        self.run.state.lock().transport_cancelable
    }

    pub fn failure_count(&self) -> u32 {
        self.run.state.lock().failure_count
    }

    pub fn is_paused(&self) -> bool {
        self.run.state.lock().phase == Phase::Paused
    }

    pub fn is_resolved(&self) -> bool {
        self.run.state.lock().phase == Phase::Resolved
    }

    pub fn result(&self) -> PendingResult<T, E> {
        self.result.clone()
    }
}

impl<T, E> Run<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn invoke(&self) -> BoxFuture<'static, Result<T, QueryError<E>>> {
        let attempt = (self.config.operation)();
        let mut state = self.state.lock();
        state.transport_cancelable = attempt.cancel.is_some();
        state.transport_cancel = attempt.cancel;
        attempt.future
    }

    /// Deliver the terminal outcome. Returns false if already resolved.
    fn resolve(&self, outcome: Result<Arc<T>, QueryError<E>>) -> bool {
        let (was_paused, sender) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Resolved {
                return false;
            }
            let was_paused = state.phase == Phase::Paused;
            state.phase = Phase::Resolved;
            (was_paused, state.sender.take())
        };

        match &outcome {
            Ok(data) => {
                if let Some(on_success) = &self.config.on_success {
                    on_success(Arc::clone(data));
                }
            }
            Err(error) => {
                if let Some(on_error) = &self.config.on_error {
                    on_error(error.clone());
                }
            }
        }

        if was_paused {
            if let Some(on_continue) = &self.config.on_continue {
                on_continue();
            }
        }

        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
        true
    }

    async fn drive(self: Arc<Self>, first: BoxFuture<'static, Result<T, QueryError<E>>>) {
        let mut attempt = first;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.halted.notified() => return,
                outcome = &mut attempt => outcome,
            };

            let error = match outcome {
                Ok(data) => {
                    self.state.lock().transport_cancel = None;
                    self.resolve(Ok(Arc::new(data)));
                    return;
                }
                Err(error) => error,
            };

            let (retrying, failure_count, delay) = {
                let mut state = self.state.lock();
                if state.phase == Phase::Resolved {
                    return;
                }
                state.transport_cancel = None;
                let delay = self.config.retry_delay.delay(state.failure_count, &error);
                let retrying = !state.cancel_retry
                    && self.config.retry.should_retry(state.failure_count, &error);
                if retrying {
                    state.failure_count += 1;
                }
                (retrying, state.failure_count, delay)
            };

            if !retrying {
                self.resolve(Err(error));
                return;
            }

            tracing::warn!(failure_count, delay_ms = millis(delay), "fetch attempt failed, retrying");
            if let Some(on_fail) = &self.config.on_fail {
                on_fail(failure_count, &error);
            }

            tokio::select! {
                biased;
                _ = self.halted.notified() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if !self.config.runtime.is_favorable() && !self.pause().await {
                return;
            }

            {
                let state = self.state.lock();
                if state.phase == Phase::Resolved {
                    return;
                }
                if state.cancel_retry {
                    drop(state);
                    self.resolve(Err(error));
                    return;
                }
            }

            attempt = self.invoke();
        }
    }

    /// Wait for `resume`. Returns false if the run resolved meanwhile.
    async fn pause(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Resolved {
                return false;
            }
            state.phase = Phase::Paused;
        }

        tracing::debug!("retry paused until focused and online");
        if let Some(on_pause) = &self.config.on_pause {
            on_pause();
        }

        // A resume that ran before the phase flip found nothing to wake.
        if !self.config.runtime.is_favorable() {
            tokio::select! {
                biased;
                _ = self.halted.notified() => return false,
                _ = self.wake.notified() => {}
            }
        }

        {
            let mut state = self.state.lock();
            if state.phase == Phase::Resolved {
                return false;
            }
            state.phase = Phase::Running;
        }

        if let Some(on_continue) = &self.config.on_continue {
            on_continue();
        }
        true
    }
}

impl<T, E> fmt::Debug for Retryer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.run.state.lock();
        f.debug_struct("Retryer")
            .field("phase", &state.phase)
            .field("failure_count", &state.failure_count)
            .field("cancel_retry", &state.cancel_retry)
            .field("transport_cancelable", &state.transport_cancelable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    type Config = RetryerConfig<u32, String>;

    /// Fails `failures` times, then succeeds with the attempt number.
    fn flaky(failures: u32) -> (Arc<AtomicU32>, impl Fn() -> Attempt<u32, String> + Send + Sync) {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let operation = move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst) + 1;
            Attempt::new(async move {
                if n <= failures {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            })
        };
        (calls, operation)
    }

    #[test]
    fn default_delay_is_capped_exponential() {
        assert_eq!(default_retry_delay(0), Duration::from_millis(1000));
        assert_eq!(default_retry_delay(1), Duration::from_millis(2000));
        assert_eq!(default_retry_delay(4), Duration::from_millis(16000));
        assert_eq!(default_retry_delay(5), Duration::from_millis(30000));
        assert_eq!(default_retry_delay(40), Duration::from_millis(30000));
    }

    #[test]
    fn retry_policies() {
        let error: QueryError<String> = QueryError::fetch("x".into());
        assert!(!Retry::<String>::Never.should_retry(0, &error));
        assert!(Retry::<String>::Always.should_retry(100, &error));
        assert!(Retry::<String>::from(2).should_retry(1, &error));
        assert!(!Retry::<String>::from(2).should_retry(2, &error));
        assert!(Retry::<String>::when(|count, _| count == 0).should_retry(0, &error));
        assert!(matches!(Retry::<String>::from(false), Retry::Never));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let (calls, operation) = flaky(0);
        let successes = Arc::new(AtomicU32::new(0));
        let successes_clone = successes.clone();

        let mut config: Config = RetryerConfig::new(Runtime::new(), operation);
        config.on_success = Some(Arc::new(move |_| {
            successes_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let retryer = Retryer::start(config);
        // Operation runs synchronously on start
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let value = retryer.result().await.expect("fetch succeeds");
        assert_eq!(*value, 1);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(retryer.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (calls, operation) = flaky(2);
        let fails = Arc::new(Mutex::new(Vec::new()));
        let fails_clone = fails.clone();

        let mut config: Config = RetryerConfig::new(Runtime::new(), operation);
        config.on_fail = Some(Arc::new(move |count, _| fails_clone.lock().push(count)));

        let retryer = Retryer::start(config);
        let value = retryer.result().await.expect("third attempt succeeds");

        assert_eq!(*value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*fails.lock(), vec![1, 2]);
        assert_eq!(retryer.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_reject_with_last_error() {
        let (calls, operation) = flaky(10);
        let errors = Arc::new(AtomicU32::new(0));
        let errors_clone = errors.clone();

        let mut config: Config = RetryerConfig::new(Runtime::new(), operation);
        config.retry = Retry::Times(1);
        config.retry_delay = RetryDelay::Fixed(Duration::from_millis(10));
        config.on_error = Some(Arc::new(move |_| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let error = Retryer::start(config).result().await.unwrap_err();
        assert_eq!(error.as_fetch().map(String::as_str), Some("attempt 2 failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_rejects_and_runs_hooks() {
        let aborted = Arc::new(AtomicBool::new(false));
        let transport_cancelled = Arc::new(AtomicBool::new(false));

        let transport = transport_cancelled.clone();
        let operation = move || {
            let transport = transport.clone();
            Attempt::new(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<u32, String>(1)
            })
            .with_cancel(move || transport.store(true, Ordering::SeqCst))
        };

        let aborted_clone = aborted.clone();
        let mut config: Config = RetryerConfig::new(Runtime::new(), operation);
        config.abort = Some(Arc::new(move || aborted_clone.store(true, Ordering::SeqCst)));

        let retryer = Retryer::start(config);
        assert!(retryer.is_transport_cancelable());

        retryer.cancel(CancelOptions::revert());
        let error = retryer.result().await.unwrap_err();

        assert_eq!(
            error.as_cancelled(),
            Some(&CancelledError {
                revert: true,
                silent: false
            })
        );
        assert!(aborted.load(Ordering::SeqCst));
        assert!(transport_cancelled.load(Ordering::SeqCst));

        // Second cancel is a no-op
        retryer.cancel(CancelOptions::silent());
        assert!(retryer.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_retry_lets_attempt_finish_without_retrying() {
        let (calls, operation) = flaky(10);
        let config: Config = RetryerConfig::new(Runtime::new(), operation);

        let retryer = Retryer::start(config);
        retryer.cancel_retry();

        let error = retryer.result().await.unwrap_err();
        assert!(!error.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_while_unfocused_and_resumes() {
        let runtime = Runtime::new();
        runtime.focus().set_focused(Some(false));

        let (calls, operation) = flaky(1);
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut config: Config = RetryerConfig::new(runtime.clone(), operation);
        let log = events.clone();
        config.on_pause = Some(Arc::new(move || log.lock().push("pause")));
        let log = events.clone();
        config.on_continue = Some(Arc::new(move || log.lock().push("continue")));
        config.retry_delay = RetryDelay::Fixed(Duration::from_millis(100));

        let retryer = Retryer::start(config);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(retryer.is_paused());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runtime.focus().set_focused(Some(true));
        retryer.resume();

        let value = retryer.result().await.expect("resumed attempt succeeds");
        assert_eq!(*value, 2);
        assert_eq!(*events.lock(), vec!["pause", "continue"]);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_regained_before_parking_does_not_stall() {
        let runtime = Runtime::new();
        runtime.focus().set_focused(Some(false));

        let (calls, operation) = flaky(1);
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut config: Config = RetryerConfig::new(runtime.clone(), operation);
        let log = events.clone();
        let focus = runtime.clone();
        // Focus returns after the run decided to pause but before it waits.
        // The resume that would follow finds the run still running.
        config.on_pause = Some(Arc::new(move || {
            log.lock().push("pause");
            focus.focus().set_focused(Some(true));
        }));
        let log = events.clone();
        config.on_continue = Some(Arc::new(move || log.lock().push("continue")));
        config.retry_delay = RetryDelay::Fixed(Duration::from_millis(100));

        let retryer = Retryer::start(config);

        let value = tokio::time::timeout(Duration::from_secs(5), retryer.result())
            .await
            .expect("run does not stall")
            .expect("second attempt succeeds");
        assert_eq!(*value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!retryer.is_paused());
        assert_eq!(*events.lock(), vec!["pause", "continue"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_paused_continues_once() {
        let runtime = Runtime::new();
        runtime.online().set_online(Some(false));

        let (_calls, operation) = flaky(5);
        let continues = Arc::new(AtomicU32::new(0));

        let mut config: Config = RetryerConfig::new(runtime, operation);
        config.retry_delay = RetryDelay::Fixed(Duration::from_millis(1));
        let continues_clone = continues.clone();
        config.on_continue = Some(Arc::new(move || {
            continues_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let retryer = Retryer::start(config);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(retryer.is_paused());

        retryer.cancel(CancelOptions::silent());
        assert!(retryer.result().await.unwrap_err().is_cancelled());
        tokio::task::yield_now().await;
        assert_eq!(continues.load(Ordering::SeqCst), 1);
    }
}

use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use quarry_core::query::{hash_key, partial_match_key, replace_equal_deep};
use quarry_core::QueryKey;
use serde_json::json;

fn bench_key_hashing(c: &mut Criterion) {
    let simple = QueryKey::from("todos");
    let nested = QueryKey::from("todos").with(json!({
        "page": 3,
        "filter": { "status": "open", "tags": ["a", "b", "c"], "assignee": null },
        "sort": "created",
    }));

    c.bench_function("key/hash_simple", |b| {
        b.iter(|| black_box(hash_key(black_box(&simple))));
    });

    c.bench_function("key/hash_nested", |b| {
        b.iter(|| black_box(hash_key(black_box(&nested))));
    });

    let filter = QueryKey::from("todos").with(json!({ "filter": { "status": "open" } }));
    c.bench_function("key/partial_match", |b| {
        b.iter(|| black_box(partial_match_key(black_box(&nested), black_box(&filter))));
    });
}

fn bench_structural_sharing(c: &mut Criterion) {
    let rows: Vec<Arc<String>> = (0..1_000).map(|i| Arc::new(format!("row {i}"))).collect();
    let previous = Arc::new(rows.clone());

    c.bench_function("share/vec_equal", |b| {
        b.iter(|| {
            let next = Arc::new(rows.iter().map(|row| Arc::new(row.to_string())).collect::<Vec<_>>());
            black_box(replace_equal_deep(Some(&previous), next));
        });
    });

    c.bench_function("share/vec_one_changed", |b| {
        b.iter(|| {
            let mut next: Vec<Arc<String>> = rows.iter().map(|row| Arc::new(row.to_string())).collect();
            next[500] = Arc::new("changed".to_string());
            black_box(replace_equal_deep(Some(&previous), Arc::new(next)));
        });
    });

    let map: BTreeMap<String, Arc<u64>> = (0..1_000).map(|i| (format!("k{i}"), Arc::new(i))).collect();
    let previous_map = Arc::new(map.clone());
    c.bench_function("share/map_equal", |b| {
        b.iter(|| black_box(replace_equal_deep(Some(&previous_map), Arc::new(map.clone()))));
    });
}

criterion_group!(benches, bench_key_hashing, bench_structural_sharing);
criterion_main!(benches);

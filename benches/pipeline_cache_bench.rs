//! Hot-path benchmarks for the pipeline cache.
//!
//! Run with `cargo bench --bench pipeline_cache_bench`.

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use myth_pipeline_cache::{
    BackendError, CacheResource, LruCache, LruCacheConfig, PipelineConfigKey,
};

struct NullPipeline;

impl CacheResource for NullPipeline {}

fn keys(count: usize) -> Vec<PipelineConfigKey> {
    (0..count)
        .map(|i| {
            PipelineConfigKey::builder(format!("Material{i}"))
                .define("VARIANT", i.to_string())
                .build()
                .unwrap()
        })
        .collect()
}

fn config(capacity: usize) -> LruCacheConfig {
    LruCacheConfig {
        capacity,
        max_age: None,
        sweep_interval: None,
    }
}

fn bench_key_hashing(c: &mut Criterion) {
    let key = keys(1).remove(0);
    let mut group = c.benchmark_group("key");
    group.bench_function("encode", |b| b.iter(|| black_box(&key).to_bytes()));
    group.bench_function("clone_and_compare", |b| {
        b.iter(|| black_box(key.clone()) == key);
    });
    group.finish();
}

fn bench_hit_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_hit");
    group.measurement_time(Duration::from_secs(2));

    for resident in [16usize, 256, 4096] {
        let cache = LruCache::<PipelineConfigKey, NullPipeline>::new(config(resident)).unwrap();
        let keys = keys(resident);
        for key in &keys {
            cache
                .get_or_create(key, || Ok::<_, BackendError>(NullPipeline))
                .unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(resident), &keys, |b, keys| {
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i = i.wrapping_add(1);
                cache
                    .get_or_create(black_box(key), || Ok::<_, BackendError>(NullPipeline))
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_eviction_churn(c: &mut Criterion) {
    let cache = LruCache::<PipelineConfigKey, NullPipeline>::new(config(64)).unwrap();
    let keys = keys(256);

    c.bench_function("lookup_miss_evict", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i = i.wrapping_add(1);
            cache
                .get_or_create(key, || Ok::<_, BackendError>(NullPipeline))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_key_hashing, bench_hit_path, bench_eviction_churn);
criterion_main!(benches);

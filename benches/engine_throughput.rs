/// Full-pipeline throughput benchmark
///
/// Measures one complete analysis pass over a synthetic stepped-load batch.
/// Helps catch regressions in the aggregation and correlation paths, which
/// dominate run time on large batches.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;

use cuello::config::AnalysisConfig;
use cuello::engine::AnalysisEngine;
use cuello::sample::{DeviceMetrics, Sample, SampleBatch};

fn synthetic_batch(levels: u32, samples_per_level: u32) -> SampleBatch {
    let mut samples = Vec::new();
    for level in 1..=levels {
        let qps = level * 1000;
        for i in 0..samples_per_level {
            let jitter = (i % 7) as f32 * 0.3;
            let mut devices = BTreeMap::new();
            devices.insert(
                "data".to_string(),
                DeviceMetrics {
                    util_pct: Some(8.0 * level as f32 + jitter),
                    total_iops: Some(900.0 * level as f32),
                    avg_await_ms: Some(0.3 + 0.05 * level as f32),
                    ..DeviceMetrics::default()
                },
            );
            samples.push(Sample {
                timestamp_ms: (qps + i) as u64,
                qps,
                cpu_usage: 7.5 * level as f32 + jitter,
                mem_usage: 40.0 + level as f32,
                rpc_latency_ms: Some(5.0 + 1.8f32.powi(level as i32) + jitter),
                devices,
            });
        }
    }
    SampleBatch::new(samples)
}

fn bench_full_analysis(c: &mut Criterion) {
    let engine = AnalysisEngine::new(AnalysisConfig::default()).expect("valid default config");

    let mut group = c.benchmark_group("analyze");
    for (name, batch) in [
        ("10x50", synthetic_batch(10, 50)),
        ("10x200", synthetic_batch(10, 200)),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(engine.analyze(black_box(&batch))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_analysis);
criterion_main!(benches);

//! Per-QPS-level aggregation
//!
//! Groups the batch into one [`QpsLevelAggregate`] per distinct load level,
//! ascending by QPS. Aggregates are derived once per batch and read-only
//! afterwards; the only back-reference they keep is a list of sample indices
//! for cliff factor analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sample::{Metric, SampleBatch};
use crate::stats;

/// Mean / max / population-std / median of one metric at one load level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f32,
    pub max: f32,
    pub std: f32,
    pub median: f32,
}

impl MetricSummary {
    /// Summarize the finite values of a series; `None` if none are finite
    pub fn from_series(values: &[f32]) -> Option<Self> {
        let valid = stats::finite(values);
        if valid.is_empty() {
            return None;
        }
        Some(Self {
            mean: stats::mean(&valid),
            max: stats::max(&valid),
            std: stats::stddev(&valid),
            median: stats::median(&valid).unwrap_or(0.0),
        })
    }
}

/// Aggregated telemetry for one distinct QPS level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QpsLevelAggregate {
    /// The load level (grouping key)
    pub qps: u32,
    /// Number of samples collected at this level
    pub count: usize,
    pub cpu: MetricSummary,
    pub mem: MetricSummary,
    /// Absent when no sample at this level carried latency data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<MetricSummary>,
    /// Indices into the source batch, in collection order (weak reference)
    pub sample_indices: Vec<usize>,
}

/// Group a batch into per-level aggregates, ascending by QPS
pub fn aggregate_by_qps(batch: &SampleBatch) -> Vec<QpsLevelAggregate> {
    let mut levels: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, sample) in batch.samples().iter().enumerate() {
        levels.entry(sample.qps).or_default().push(i);
    }

    levels
        .into_iter()
        .map(|(qps, indices)| {
            let gather = |metric: &Metric| -> Vec<f32> {
                indices
                    .iter()
                    .filter_map(|&i| metric.value(&batch.samples()[i]))
                    .collect()
            };

            let cpu_values = gather(&Metric::Cpu);
            let mem_values = gather(&Metric::Mem);
            let latency_values = gather(&Metric::RpcLatency);

            QpsLevelAggregate {
                qps,
                count: indices.len(),
                cpu: MetricSummary::from_series(&cpu_values).unwrap_or_default(),
                mem: MetricSummary::from_series(&mem_values).unwrap_or_default(),
                latency: MetricSummary::from_series(&latency_values),
                sample_indices: indices,
            }
        })
        .collect()
}

/// Mean of an arbitrary metric over one level's samples
///
/// `None` when the metric resolved for no sample at the level (missing
/// device column, all-NaN); the caller skips the level rather than
/// substituting zero.
pub fn level_mean(batch: &SampleBatch, level: &QpsLevelAggregate, metric: &Metric) -> Option<f32> {
    let values: Vec<f32> = level
        .sample_indices
        .iter()
        .filter_map(|&i| metric.value(&batch.samples()[i]))
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(stats::mean(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use std::collections::BTreeMap;

    fn sample(qps: u32, cpu: f32, latency: Option<f32>) -> Sample {
        Sample {
            timestamp_ms: 0,
            qps,
            cpu_usage: cpu,
            mem_usage: 50.0,
            rpc_latency_ms: latency,
            devices: BTreeMap::new(),
        }
    }

    #[test]
    fn test_one_aggregate_per_distinct_qps_ascending() {
        let batch = SampleBatch::new(vec![
            sample(2000, 50.0, Some(12.0)),
            sample(1000, 30.0, Some(10.0)),
            sample(2000, 60.0, Some(14.0)),
            sample(1000, 40.0, Some(11.0)),
        ]);

        let levels = aggregate_by_qps(&batch);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].qps, 1000);
        assert_eq!(levels[1].qps, 2000);
        assert_eq!(levels[0].count, 2);
        assert!((levels[0].cpu.mean - 35.0).abs() < 1e-6);
        assert!((levels[1].latency.as_ref().unwrap().mean - 13.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_indices_keep_collection_order() {
        let batch = SampleBatch::new(vec![
            sample(1000, 30.0, None),
            sample(2000, 50.0, None),
            sample(1000, 35.0, None),
        ]);

        let levels = aggregate_by_qps(&batch);
        assert_eq!(levels[0].sample_indices, vec![0, 2]);
        assert_eq!(levels[1].sample_indices, vec![1]);
    }

    #[test]
    fn test_latency_summary_absent_without_data() {
        let batch = SampleBatch::new(vec![sample(1000, 30.0, None)]);
        let levels = aggregate_by_qps(&batch);
        assert!(levels[0].latency.is_none());
    }

    #[test]
    fn test_summary_fields() {
        let summary = MetricSummary::from_series(&[10.0, 20.0, 30.0]).unwrap();
        assert!((summary.mean - 20.0).abs() < 1e-6);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.median, 20.0);
    }

    #[test]
    fn test_level_mean_skips_missing_metric() {
        let batch = SampleBatch::new(vec![sample(1000, 30.0, None)]);
        let levels = aggregate_by_qps(&batch);
        assert_eq!(level_mean(&batch, &levels[0], &Metric::RpcLatency), None);
        assert_eq!(
            level_mean(&batch, &levels[0], &Metric::Cpu),
            Some(30.0)
        );
    }

    #[test]
    fn test_empty_batch_yields_no_levels() {
        let batch = SampleBatch::new(vec![]);
        assert!(aggregate_by_qps(&batch).is_empty());
    }
}

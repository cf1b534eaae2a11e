//! Performance cliff detection across adjacent load steps
//!
//! A cliff is a sharp degradation of the target metric between two adjacent
//! QPS levels. Threshold comparisons are strict `>`: a delta exactly equal
//! to a threshold does not fire. That boundary behavior is part of the
//! reproducibility contract and is pinned by tests.

use serde::{Deserialize, Serialize};

use crate::aggregate::{level_mean, QpsLevelAggregate};
use crate::config::AnalysisConfig;
use crate::sample::{DeviceField, DeviceRegistry, Metric, SampleBatch};

/// A metric must move more than this (percent) to count as a factor
const FACTOR_CHANGE_THRESHOLD_PCT: f32 = 10.0;
/// A factor moving more than this (percent) is high-impact
const FACTOR_HIGH_IMPACT_PCT: f32 = 50.0;

/// How strongly a factor moved across the cliff boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorImpact {
    High,
    Medium,
}

/// One metric that moved across a cliff boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub metric: String,
    pub change_percent: f32,
    pub impact: FactorImpact,
}

/// A detected step-to-step degradation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliffEvent {
    pub from_qps: u32,
    pub to_qps: u32,
    /// Target metric column the deltas were computed on
    pub metric: String,
    pub absolute_delta: f32,
    /// Absent when the pre-cliff mean is zero (division guarded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_delta: Option<f32>,
    /// Ranked by |change_percent| descending, ties by metric name
    pub contributing_factors: Vec<ContributingFactor>,
}

/// Detects cliffs over the ordered per-level aggregates
#[derive(Debug, Clone)]
pub struct CliffDetector {
    config: AnalysisConfig,
    target: Metric,
}

impl CliffDetector {
    /// Detector for the default target metric (RPC latency)
    pub fn new(config: &AnalysisConfig) -> Self {
        Self::with_target(config, Metric::RpcLatency)
    }

    /// Detector for an explicit target metric
    pub fn with_target(config: &AnalysisConfig, target: Metric) -> Self {
        Self {
            config: config.clone(),
            target,
        }
    }

    /// Tracked metrics for factor analysis, discovered from the schema
    ///
    /// CPU and memory always; then for each gauge category the first device
    /// prefix (in configured priority order) whose column resolved.
    fn tracked_metrics(&self, registry: &DeviceRegistry) -> Vec<Metric> {
        let mut tracked = vec![Metric::Cpu, Metric::Mem];
        for field in [
            DeviceField::Util,
            DeviceField::AvgAwait,
            DeviceField::TotalIops,
            DeviceField::Throughput,
            DeviceField::QueueDepth,
        ] {
            if let Some(prefix) = registry.first_with(&self.config.device_priority, field) {
                tracked.push(Metric::device(&prefix, field));
            }
        }
        tracked
    }

    /// Scan adjacent level pairs, ascending by QPS
    pub fn detect(
        &self,
        batch: &SampleBatch,
        registry: &DeviceRegistry,
        levels: &[QpsLevelAggregate],
    ) -> Vec<CliffEvent> {
        let tracked = self.tracked_metrics(registry);
        let mut events = Vec::new();

        for pair in levels.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let (Some(prev_mean), Some(next_mean)) = (
                level_mean(batch, prev, &self.target),
                level_mean(batch, next, &self.target),
            ) else {
                tracing::debug!(
                    from = prev.qps,
                    to = next.qps,
                    "target metric missing at one level, pair skipped"
                );
                continue;
            };

            let absolute_delta = next_mean - prev_mean;
            let percent_delta = if prev_mean != 0.0 {
                Some(absolute_delta / prev_mean * 100.0)
            } else {
                None
            };

            let fires = absolute_delta > self.config.cliff_abs_threshold_ms
                || percent_delta
                    .is_some_and(|p| p.abs() > self.config.cliff_pct_threshold_pct);
            if !fires {
                continue;
            }

            events.push(CliffEvent {
                from_qps: prev.qps,
                to_qps: next.qps,
                metric: self.target.name(),
                absolute_delta,
                percent_delta,
                contributing_factors: self.boundary_factors(batch, prev, next, &tracked),
            });
        }

        events
    }

    /// Compare each tracked metric at the boundary samples of a flagged step
    ///
    /// Last sample of the pre-cliff level vs first sample of the post-cliff
    /// level; a zero or missing pre-cliff value is skipped, never divided.
    fn boundary_factors(
        &self,
        batch: &SampleBatch,
        prev: &QpsLevelAggregate,
        next: &QpsLevelAggregate,
        tracked: &[Metric],
    ) -> Vec<ContributingFactor> {
        let (Some(&pre_idx), Some(&post_idx)) =
            (prev.sample_indices.last(), next.sample_indices.first())
        else {
            return Vec::new();
        };
        let pre_sample = &batch.samples()[pre_idx];
        let post_sample = &batch.samples()[post_idx];

        let mut factors: Vec<ContributingFactor> = tracked
            .iter()
            .filter_map(|metric| {
                let pre = metric.value(pre_sample).filter(|v| v.is_finite())?;
                let post = metric.value(post_sample).filter(|v| v.is_finite())?;
                if pre == 0.0 {
                    return None;
                }
                let change_percent = (post - pre) / pre * 100.0;
                if change_percent.abs() <= FACTOR_CHANGE_THRESHOLD_PCT {
                    return None;
                }
                let impact = if change_percent.abs() > FACTOR_HIGH_IMPACT_PCT {
                    FactorImpact::High
                } else {
                    FactorImpact::Medium
                };
                Some(ContributingFactor {
                    metric: metric.name(),
                    change_percent,
                    impact,
                })
            })
            .collect();

        factors.sort_by(|a, b| {
            b.change_percent
                .abs()
                .partial_cmp(&a.change_percent.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.metric.cmp(&b.metric))
        });
        factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_by_qps;
    use crate::sample::{DeviceMetrics, Sample};
    use std::collections::BTreeMap;

    fn sample(qps: u32, cpu: f32, mem: f32, latency: f32) -> Sample {
        Sample {
            timestamp_ms: qps as u64,
            qps,
            cpu_usage: cpu,
            mem_usage: mem,
            rpc_latency_ms: Some(latency),
            devices: BTreeMap::new(),
        }
    }

    fn detect(batch: &SampleBatch) -> Vec<CliffEvent> {
        let registry = DeviceRegistry::probe(batch);
        let levels = aggregate_by_qps(batch);
        CliffDetector::new(&AnalysisConfig::default()).detect(batch, &registry, &levels)
    }

    #[test]
    fn test_cliff_at_sharp_step_only() {
        // Mean latency 10 -> 12 -> 50 over three levels: only the second
        // step fires (delta 38 > 10 ms, +316.7% > 50%).
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 10.0),
            sample(2000, 55.0, 52.0, 12.0),
            sample(3000, 80.0, 57.5, 50.0),
        ]);

        let events = detect(&batch);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.from_qps, 2000);
        assert_eq!(event.to_qps, 3000);
        assert!((event.absolute_delta - 38.0).abs() < 1e-4);
        let pct = event.percent_delta.unwrap();
        assert!((pct - 316.6667).abs() < 0.01);
    }

    #[test]
    fn test_boundary_equality_does_not_fire() {
        // delta exactly 10 ms and exactly 50%: strict > means no event
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 20.0),
            sample(2000, 50.0, 50.0, 30.0),
        ]);
        assert!(detect(&batch).is_empty());
    }

    #[test]
    fn test_just_above_boundary_fires() {
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 20.0),
            sample(2000, 50.0, 50.0, 30.1),
        ]);
        assert_eq!(detect(&batch).len(), 1);
    }

    #[test]
    fn test_relative_improvement_cliff_fires_on_percent() {
        // Latency collapse 100 -> 30: absolute delta is negative but the
        // |percent| test catches the 70% swing.
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 100.0),
            sample(2000, 50.0, 50.0, 30.0),
        ]);
        let events = detect(&batch);
        assert_eq!(events.len(), 1);
        assert!(events[0].absolute_delta < 0.0);
    }

    #[test]
    fn test_factors_ranked_by_change_magnitude() {
        // Across the firing step cpu jumps 60%, mem 15%; cpu ranks first
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 10.0),
            sample(2000, 50.0, 50.0, 12.0),
            sample(3000, 80.0, 57.5, 50.0),
        ]);

        let events = detect(&batch);
        let factors = &events[0].contributing_factors;
        assert_eq!(factors.len(), 2);
        assert_eq!(factors[0].metric, "cpu_usage");
        assert!((factors[0].change_percent - 60.0).abs() < 1e-4);
        assert_eq!(factors[0].impact, FactorImpact::High);
        assert_eq!(factors[1].metric, "mem_usage");
        assert_eq!(factors[1].impact, FactorImpact::Medium);
    }

    #[test]
    fn test_factor_below_ten_percent_excluded() {
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 10.0),
            sample(2000, 54.0, 50.0, 60.0), // cpu +8%, mem flat
        ]);
        let events = detect(&batch);
        assert_eq!(events.len(), 1);
        assert!(events[0].contributing_factors.is_empty());
    }

    #[test]
    fn test_device_metric_tracked_via_priority() {
        let mut devices = BTreeMap::new();
        devices.insert(
            "accounts".to_string(),
            DeviceMetrics {
                util_pct: Some(20.0),
                ..DeviceMetrics::default()
            },
        );
        let mut pre = sample(1000, 50.0, 50.0, 10.0);
        pre.devices = devices.clone();

        let mut devices_post = BTreeMap::new();
        devices_post.insert(
            "accounts".to_string(),
            DeviceMetrics {
                util_pct: Some(95.0),
                ..DeviceMetrics::default()
            },
        );
        let mut post = sample(2000, 50.0, 50.0, 60.0);
        post.devices = devices_post;

        let batch = SampleBatch::new(vec![pre, post]);
        let events = detect(&batch);
        assert_eq!(events.len(), 1);
        let factors = &events[0].contributing_factors;
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].metric, "accounts_util");
        assert_eq!(factors[0].impact, FactorImpact::High);
    }

    #[test]
    fn test_level_without_latency_skips_pair() {
        let mut no_latency = sample(2000, 50.0, 50.0, 0.0);
        no_latency.rpc_latency_ms = None;
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 10.0),
            no_latency,
            sample(3000, 50.0, 50.0, 90.0),
        ]);
        // 1000->2000 and 2000->3000 both have a missing side; nothing fires
        assert!(detect(&batch).is_empty());
    }

    #[test]
    fn test_zero_previous_mean_guards_percent() {
        let batch = SampleBatch::new(vec![
            sample(1000, 50.0, 50.0, 0.0),
            sample(2000, 50.0, 50.0, 15.0),
        ]);
        let events = detect(&batch);
        assert_eq!(events.len(), 1); // absolute test: 15 > 10
        assert_eq!(events[0].percent_delta, None);
    }
}

//! Rule-based bottleneck classification
//!
//! One ordered decision table, first match wins. Every predicate reads the
//! high-QPS window (samples at or above the configured QPS quantile) or the
//! special point (the sample closest to `special_qps_ratio * max_qps`), and
//! every threshold comes from the injected configuration. Each row is a
//! plain function pair so it can be tested on its own.

use serde::{Deserialize, Serialize};

use crate::cliff::CliffEvent;
use crate::config::AnalysisConfig;
use crate::sample::{DeviceField, DeviceRegistry, Metric, SampleBatch};
use crate::stats;

/// Dominant resource category behind an observed performance ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    Cpu,
    Memory,
    RpcProcessing,
    NetworkIo,
    Ebs,
    Balanced,
    Unknown,
}

/// A resource whose own threshold tripped over the high-QPS window
///
/// Secondary to the primary verdict; the severity scorer aggregates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFinding {
    pub kind: BottleneckKind,
    /// Column the finding was measured on
    pub metric: String,
    pub value: f32,
    pub threshold: f32,
    /// Value exceeds the threshold by more than the configured boost margin
    pub exceeds_margin: bool,
}

/// Final classification output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckVerdict {
    pub primary: BottleneckKind,
    pub confidence: f32,
    /// Human-readable evidence, ordered; empty only for `Unknown`
    pub evidence: Vec<String>,
    pub recommendations: Vec<String>,
    /// All per-resource threshold trips, in detection order
    pub detected: Vec<ResourceFinding>,
}

/// Aggregated view of the high-QPS window and the special point
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    /// QPS value that opens the window
    pub qps_cut: f32,
    /// Batch indices of the window samples, ascending
    pub window_indices: Vec<usize>,
    pub avg_cpu: f32,
    pub avg_mem: f32,
    /// Absent when no window sample carried latency data
    pub avg_latency: Option<f32>,
    /// QPS of the special-point sample
    pub special_qps: u32,
    pub cpu_special: f32,
    pub latency_special: Option<f32>,
}

impl WindowStats {
    /// Compute window and special-point statistics; `None` on an empty batch
    pub fn compute(batch: &SampleBatch, config: &AnalysisConfig) -> Option<Self> {
        if batch.is_empty() {
            return None;
        }
        let samples = batch.samples();

        let qps_sorted = stats::sorted(&batch.series(&Metric::Qps));
        let qps_cut = stats::percentile_sorted(&qps_sorted, config.high_qps_quantile * 100.0);

        let window_indices: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.qps as f32 >= qps_cut)
            .map(|(i, _)| i)
            .collect();

        let gather = |metric: &Metric| -> Vec<f32> {
            window_indices
                .iter()
                .filter_map(|&i| metric.value(&samples[i]))
                .filter(|v| v.is_finite())
                .collect()
        };

        let cpu_values = gather(&Metric::Cpu);
        let mem_values = gather(&Metric::Mem);
        let latency_values = gather(&Metric::RpcLatency);

        // Special point: the sample closest to special_qps_ratio * max_qps,
        // earliest sample winning ties (documented, keeps runs reproducible)
        let max_qps = samples.iter().map(|s| s.qps).max().unwrap_or(0);
        let target = config.special_qps_ratio * max_qps as f64;
        let special_idx = samples
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (a.qps as f64 - target).abs();
                let db = (b.qps as f64 - target).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)?;
        let special = &samples[special_idx];

        Some(Self {
            qps_cut,
            window_indices,
            avg_cpu: stats::mean(&cpu_values),
            avg_mem: stats::mean(&mem_values),
            avg_latency: (!latency_values.is_empty()).then(|| stats::mean(&latency_values)),
            special_qps: special.qps,
            cpu_special: special.cpu_usage,
            latency_special: special.rpc_latency_ms.filter(|v| v.is_finite()),
        })
    }
}

/// One row of the decision table
pub struct Rule {
    pub name: &'static str,
    pub kind: BottleneckKind,
    pub confidence: f32,
    pub matches: fn(&WindowStats, &AnalysisConfig) -> bool,
    pub evidence: fn(&WindowStats, &AnalysisConfig) -> String,
}

fn special_rpc_matches(w: &WindowStats, c: &AnalysisConfig) -> bool {
    w.latency_special
        .is_some_and(|lat| lat > c.rpc_warning_latency_threshold_ms)
        && w.cpu_special < c.low_cpu_threshold
}

fn special_rpc_evidence(w: &WindowStats, c: &AnalysisConfig) -> String {
    format!(
        "latency at the special point is {:.1} ms at {} QPS (warning threshold {} ms) while CPU sits at {:.1}% (idle below {}%)",
        w.latency_special.unwrap_or(0.0),
        w.special_qps,
        c.rpc_warning_latency_threshold_ms,
        w.cpu_special,
        c.low_cpu_threshold
    )
}

fn high_cpu_matches(w: &WindowStats, c: &AnalysisConfig) -> bool {
    w.avg_cpu > c.cpu_threshold
}

fn high_cpu_evidence(w: &WindowStats, c: &AnalysisConfig) -> String {
    format!(
        "high-QPS window CPU averages {:.1}% (threshold {}%)",
        w.avg_cpu, c.cpu_threshold
    )
}

fn high_mem_matches(w: &WindowStats, c: &AnalysisConfig) -> bool {
    w.avg_mem > c.memory_threshold
}

fn high_mem_evidence(w: &WindowStats, c: &AnalysisConfig) -> String {
    format!(
        "high-QPS window memory averages {:.1}% (threshold {}%)",
        w.avg_mem, c.memory_threshold
    )
}

fn slow_rpc_idle_cpu_matches(w: &WindowStats, c: &AnalysisConfig) -> bool {
    w.avg_latency
        .is_some_and(|lat| lat > c.high_latency_threshold_ms)
        && w.avg_cpu < c.low_cpu_threshold
}

fn slow_rpc_idle_cpu_evidence(w: &WindowStats, c: &AnalysisConfig) -> String {
    format!(
        "window latency averages {:.1} ms (threshold {} ms) with CPU at only {:.1}% (below {}%)",
        w.avg_latency.unwrap_or(0.0),
        c.high_latency_threshold_ms,
        w.avg_cpu,
        c.low_cpu_threshold
    )
}

fn very_high_latency_matches(w: &WindowStats, c: &AnalysisConfig) -> bool {
    w.avg_latency
        .is_some_and(|lat| lat > c.very_high_latency_threshold_ms)
}

fn very_high_latency_evidence(w: &WindowStats, c: &AnalysisConfig) -> String {
    format!(
        "window latency averages {:.1} ms, past the very-high threshold ({} ms), pointing at the network path",
        w.avg_latency.unwrap_or(0.0),
        c.very_high_latency_threshold_ms
    )
}

fn balanced_matches(_w: &WindowStats, _c: &AnalysisConfig) -> bool {
    true
}

fn balanced_evidence(w: &WindowStats, _c: &AnalysisConfig) -> String {
    format!(
        "no resource exceeded its threshold over the high-QPS window ({} samples at or above {:.0} QPS)",
        w.window_indices.len(),
        w.qps_cut
    )
}

/// The ordered decision table; first match wins
pub static DECISION_TABLE: &[Rule] = &[
    Rule {
        name: "special_point_rpc_stall",
        kind: BottleneckKind::RpcProcessing,
        confidence: 0.8,
        matches: special_rpc_matches,
        evidence: special_rpc_evidence,
    },
    Rule {
        name: "high_cpu",
        kind: BottleneckKind::Cpu,
        confidence: 0.8,
        matches: high_cpu_matches,
        evidence: high_cpu_evidence,
    },
    Rule {
        name: "high_memory",
        kind: BottleneckKind::Memory,
        confidence: 0.8,
        matches: high_mem_matches,
        evidence: high_mem_evidence,
    },
    Rule {
        name: "slow_rpc_idle_cpu",
        kind: BottleneckKind::RpcProcessing,
        confidence: 0.7,
        matches: slow_rpc_idle_cpu_matches,
        evidence: slow_rpc_idle_cpu_evidence,
    },
    Rule {
        name: "very_high_latency",
        kind: BottleneckKind::NetworkIo,
        confidence: 0.6,
        matches: very_high_latency_matches,
        evidence: very_high_latency_evidence,
    },
    Rule {
        name: "balanced",
        kind: BottleneckKind::Balanced,
        confidence: 0.5,
        matches: balanced_matches,
        evidence: balanced_evidence,
    },
];

/// Fixed recommendation list per bottleneck kind
pub fn recommendations_for(kind: BottleneckKind) -> Vec<String> {
    let items: &[&str] = match kind {
        BottleneckKind::Cpu => &[
            "upgrade or add CPU capacity",
            "profile and optimize hot paths",
            "scale horizontally across more nodes",
        ],
        BottleneckKind::Memory => &[
            "increase memory or shrink caches",
            "check for leaks and oversized working sets",
            "consider sharding the dataset",
        ],
        BottleneckKind::RpcProcessing => &[
            "inspect server-side request handling",
            "check thread-pool and queue sizing",
            "profile serialization and lock contention",
        ],
        BottleneckKind::NetworkIo => &[
            "check network bandwidth and round-trip times",
            "batch or compress RPC payloads",
            "co-locate clients and the service",
        ],
        BottleneckKind::Ebs => &[
            "raise provisioned IOPS or throughput",
            "spread hot data across volumes",
            "coalesce small writes",
        ],
        BottleneckKind::Balanced => &["no dominant bottleneck; increase load depth to expose one"],
        BottleneckKind::Unknown => &[],
    };
    items.iter().map(|s| s.to_string()).collect()
}

/// First-match-wins classifier over the decision table
#[derive(Debug, Clone)]
pub struct BottleneckClassifier {
    config: AnalysisConfig,
}

impl BottleneckClassifier {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Classify the dominant bottleneck and collect per-resource findings
    pub fn classify(
        &self,
        batch: &SampleBatch,
        registry: &DeviceRegistry,
        cliffs: &[CliffEvent],
    ) -> BottleneckVerdict {
        let Some(window) = WindowStats::compute(batch, &self.config) else {
            return BottleneckVerdict {
                primary: BottleneckKind::Unknown,
                confidence: 0.0,
                evidence: Vec::new(),
                recommendations: recommendations_for(BottleneckKind::Unknown),
                detected: Vec::new(),
            };
        };

        let rule = DECISION_TABLE
            .iter()
            .find(|rule| (rule.matches)(&window, &self.config))
            .unwrap_or_else(|| &DECISION_TABLE[DECISION_TABLE.len() - 1]);

        let mut evidence = vec![(rule.evidence)(&window, &self.config)];
        if let Some(steepest) = cliffs.iter().max_by(|a, b| {
            a.absolute_delta
                .partial_cmp(&b.absolute_delta)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            evidence.push(format!(
                "{} latency cliff(s) detected, steepest at {} -> {} QPS (+{:.1} ms)",
                cliffs.len(),
                steepest.from_qps,
                steepest.to_qps,
                steepest.absolute_delta
            ));
        }

        BottleneckVerdict {
            primary: rule.kind,
            confidence: rule.confidence,
            evidence,
            recommendations: recommendations_for(rule.kind),
            detected: self.detect_findings(batch, registry, &window),
        }
    }

    /// Every resource whose own threshold tripped over the window
    fn detect_findings(
        &self,
        batch: &SampleBatch,
        registry: &DeviceRegistry,
        window: &WindowStats,
    ) -> Vec<ResourceFinding> {
        let c = &self.config;
        let mut findings = Vec::new();

        let mut push = |kind, metric: String, value: f32, threshold: f32| {
            if value > threshold {
                findings.push(ResourceFinding {
                    kind,
                    metric,
                    value,
                    threshold,
                    exceeds_margin: value
                        > threshold * (1.0 + c.severity_boost_margin_pct / 100.0),
                });
            }
        };

        push(
            BottleneckKind::Cpu,
            Metric::Cpu.name(),
            window.avg_cpu,
            c.cpu_threshold,
        );
        push(
            BottleneckKind::Memory,
            Metric::Mem.name(),
            window.avg_mem,
            c.memory_threshold,
        );
        if let Some(latency) = window.avg_latency {
            push(
                BottleneckKind::RpcProcessing,
                Metric::RpcLatency.name(),
                latency,
                c.high_latency_threshold_ms,
            );
            push(
                BottleneckKind::NetworkIo,
                Metric::RpcLatency.name(),
                latency,
                c.very_high_latency_threshold_ms,
            );
        }

        for prefix in registry.device_names() {
            let metric = Metric::device(prefix, DeviceField::Util);
            let values: Vec<f32> = window
                .window_indices
                .iter()
                .filter_map(|&i| metric.value(&batch.samples()[i]))
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            push(
                BottleneckKind::Ebs,
                metric.name(),
                stats::mean(&values),
                c.device_util_threshold_pct,
            );
        }

        findings
    }
}

// Configuration for bottleneck and anomaly analysis
//
// Every threshold is an explicit, immutable value injected into the
// components. Nothing here is read from the process environment.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// How deep the benchmark run drove the system under test
///
/// A `Quick` run stops before load is high enough to trip bottleneck
/// thresholds, so severity scoring reports an explicit insufficient-depth
/// outcome instead of a misleading grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BenchmarkMode {
    /// Full stepped-load sweep up to saturation
    Full,
    /// Abbreviated smoke run; not enough depth for severity grading
    Quick,
}

/// Weight profile for the severity scorer, one weight per bottleneck category
///
/// The original system shipped two competing profiles for the same
/// categories; this is the single canonical one (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub cpu: f32,
    pub memory: f32,
    pub ebs: f32,
    pub network: f32,
    pub rpc: f32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            cpu: 0.25,
            memory: 0.30,
            ebs: 0.30,
            network: 0.15,
            rpc: 0.10,
        }
    }
}

/// Configuration for the full analysis pipeline
///
/// Defaults are the recognized values for RPC-latency benchmarks sampled at
/// one-second resolution. Use [`AnalysisConfig::strict`] or
/// [`AnalysisConfig::permissive`] to shift the sensitivity of cliff and
/// outlier detection in one step.
///
/// # Example
/// ```
/// use cuello::config::AnalysisConfig;
///
/// let config = AnalysisConfig::default();
/// assert_eq!(config.cpu_threshold, 85.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// CPU usage (percent) above which the host is CPU-bound
    pub cpu_threshold: f32,

    /// Memory usage (percent) above which the host is memory-bound
    pub memory_threshold: f32,

    /// RPC latency (ms) above which the service is considered saturated
    pub rpc_latency_threshold_ms: f32,

    /// IQR multiplier for outlier bounds (1.5 is Tukey's standard fence)
    pub iqr_multiplier: f32,

    /// Standard-deviation multiplier for sigma outlier bounds
    pub sigma_multiplier: f32,

    /// Minimum upper outlier bound (ms)
    ///
    /// Keeps a low-variance latency distribution from flagging its entire
    /// tail: the upper bound never drops below this floor.
    pub min_latency_floor_ms: f32,

    /// Absolute latency increase (ms) between adjacent load steps that
    /// qualifies as a cliff
    pub cliff_abs_threshold_ms: f32,

    /// Relative change (percent) between adjacent load steps that qualifies
    /// as a cliff
    pub cliff_pct_threshold_pct: f32,

    /// Quantile of the sample QPS distribution that opens the high-QPS
    /// classification window (0.8 = samples at or above the 80th percentile)
    pub high_qps_quantile: f64,

    /// The "special point" is the sample closest to this fraction of max QPS
    pub special_qps_ratio: f64,

    /// CPU usage (percent) below which the host is considered idle
    pub low_cpu_threshold: f32,

    /// Latency (ms) at the special point that flags RPC processing trouble
    /// while the CPU is idle
    pub rpc_warning_latency_threshold_ms: f32,

    /// Window-average latency (ms) considered high
    pub high_latency_threshold_ms: f32,

    /// Window-average latency (ms) considered pathological
    pub very_high_latency_threshold_ms: f32,

    /// Device utilization (percent) above which a device is a bottleneck
    pub device_util_threshold_pct: f32,

    /// p-value below which a correlation is statistically significant
    pub significance_level: f64,

    /// Exceeding a threshold by this margin (percent of the threshold)
    /// escalates the severity multiplier from 1.0 to 1.5
    pub severity_boost_margin_pct: f32,

    /// Logical device prefixes in probe-priority order (open-ended set)
    pub device_priority: Vec<String>,

    /// Weight profile for severity scoring
    pub severity_weights: SeverityWeights,

    /// Depth of the benchmark run being analyzed
    pub benchmark_mode: BenchmarkMode,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 85.0,
            memory_threshold: 90.0,
            rpc_latency_threshold_ms: 1000.0,
            iqr_multiplier: 1.5,
            sigma_multiplier: 2.0,
            min_latency_floor_ms: 30.0,
            cliff_abs_threshold_ms: 10.0,
            cliff_pct_threshold_pct: 50.0,
            high_qps_quantile: 0.8,
            special_qps_ratio: 0.75,
            low_cpu_threshold: 30.0,
            rpc_warning_latency_threshold_ms: 20.0,
            high_latency_threshold_ms: 50.0,
            very_high_latency_threshold_ms: 100.0,
            device_util_threshold_pct: 90.0,
            significance_level: 0.05,
            severity_boost_margin_pct: 10.0,
            device_priority: vec!["data".to_string(), "accounts".to_string()],
            severity_weights: SeverityWeights::default(),
            benchmark_mode: BenchmarkMode::Full,
        }
    }
}

impl AnalysisConfig {
    /// Stricter cliff/outlier sensitivity (fewer findings, higher confidence)
    pub fn strict() -> Self {
        Self {
            iqr_multiplier: 3.0,
            sigma_multiplier: 3.0,
            cliff_abs_threshold_ms: 20.0,
            cliff_pct_threshold_pct: 100.0,
            significance_level: 0.01,
            ..Self::default()
        }
    }

    /// Looser sensitivity (more findings, earlier warnings)
    pub fn permissive() -> Self {
        Self {
            iqr_multiplier: 1.0,
            sigma_multiplier: 1.5,
            cliff_abs_threshold_ms: 5.0,
            cliff_pct_threshold_pct: 25.0,
            significance_level: 0.10,
            ..Self::default()
        }
    }

    /// Validate all thresholds, naming the first offending key
    ///
    /// Called by the engine constructor before any analysis runs.
    pub fn validate(&self) -> Result<()> {
        fn positive(key: &'static str, value: f32) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(AnalysisError::ConfigurationInvalid {
                    key,
                    reason: format!("must be a positive finite number, got {value}"),
                })
            }
        }

        fn percent(key: &'static str, value: f32) -> Result<()> {
            if value.is_finite() && (0.0..=100.0).contains(&value) {
                Ok(())
            } else {
                Err(AnalysisError::ConfigurationInvalid {
                    key,
                    reason: format!("must be in [0, 100], got {value}"),
                })
            }
        }

        fn unit_interval(key: &'static str, value: f64) -> Result<()> {
            if value.is_finite() && (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(AnalysisError::ConfigurationInvalid {
                    key,
                    reason: format!("must be in [0, 1], got {value}"),
                })
            }
        }

        percent("cpu_threshold", self.cpu_threshold)?;
        percent("memory_threshold", self.memory_threshold)?;
        percent("low_cpu_threshold", self.low_cpu_threshold)?;
        percent("device_util_threshold_pct", self.device_util_threshold_pct)?;
        positive("rpc_latency_threshold_ms", self.rpc_latency_threshold_ms)?;
        positive("iqr_multiplier", self.iqr_multiplier)?;
        positive("sigma_multiplier", self.sigma_multiplier)?;
        positive("min_latency_floor_ms", self.min_latency_floor_ms)?;
        positive("cliff_abs_threshold_ms", self.cliff_abs_threshold_ms)?;
        positive("cliff_pct_threshold_pct", self.cliff_pct_threshold_pct)?;
        positive(
            "rpc_warning_latency_threshold_ms",
            self.rpc_warning_latency_threshold_ms,
        )?;
        positive("high_latency_threshold_ms", self.high_latency_threshold_ms)?;
        positive(
            "very_high_latency_threshold_ms",
            self.very_high_latency_threshold_ms,
        )?;
        unit_interval("high_qps_quantile", self.high_qps_quantile)?;
        unit_interval("special_qps_ratio", self.special_qps_ratio)?;
        unit_interval("significance_level", self.significance_level)?;

        if !self.severity_boost_margin_pct.is_finite() || self.severity_boost_margin_pct < 0.0 {
            return Err(AnalysisError::ConfigurationInvalid {
                key: "severity_boost_margin_pct",
                reason: format!(
                    "must be non-negative, got {}",
                    self.severity_boost_margin_pct
                ),
            });
        }

        if self.low_cpu_threshold >= self.cpu_threshold {
            return Err(AnalysisError::ConfigurationInvalid {
                key: "low_cpu_threshold",
                reason: format!(
                    "must be below cpu_threshold ({} >= {})",
                    self.low_cpu_threshold, self.cpu_threshold
                ),
            });
        }

        for (key, w) in [
            ("severity_weights.cpu", self.severity_weights.cpu),
            ("severity_weights.memory", self.severity_weights.memory),
            ("severity_weights.ebs", self.severity_weights.ebs),
            ("severity_weights.network", self.severity_weights.network),
            ("severity_weights.rpc", self.severity_weights.rpc),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(AnalysisError::ConfigurationInvalid {
                    key,
                    reason: format!("weights must be non-negative, got {w}"),
                });
            }
        }

        Ok(())
    }
}

//! Outlier detection for latency series
//!
//! Two methods: Tukey IQR fences (robust) and mean +/- k sigma. Both share
//! the upper-bound floor: a low-variance latency distribution must not flag
//! its entire tail as anomalous, so the upper bound never drops below
//! `min_latency_floor_ms`. The one-sided variant used for latency screening
//! flags only the high tail; a fast response is never an anomaly.

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::stats;

/// Skew magnitude beyond which the distribution is treated as non-normal
const SKEW_THRESHOLD: f32 = 1.0;
/// Excess kurtosis beyond which tails are too heavy for sigma bounds
const KURTOSIS_THRESHOLD: f32 = 3.0;

/// Detection method used for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutlierMethod {
    /// Tukey fences: [Q1 - k*IQR, Q3 + k*IQR]
    Iqr,
    /// Mean +/- k standard deviations
    Sigma,
}

/// Result of one outlier pass over a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    /// Column name the series came from
    pub metric: String,
    pub method: OutlierMethod,
    /// Lower flagging bound, clamped at zero
    pub lower_bound: f32,
    /// Upper flagging bound, never below the configured floor
    pub upper_bound: f32,
    /// Per-sample flags, index-aligned with the input series
    pub flags: Vec<bool>,
    /// Indices of flagged samples, ascending
    pub flagged_indices: Vec<usize>,
    pub flagged_count: usize,
    /// Flagged share of all samples, 0-100
    pub flagged_percentage: f64,
    /// Finite share of all samples, 0-1
    pub valid_ratio: f64,
    pub sample_count: usize,
}

impl OutlierReport {
    fn empty(metric: &str, method: OutlierMethod, series: &[f32]) -> Self {
        Self {
            metric: metric.to_string(),
            method,
            lower_bound: 0.0,
            upper_bound: 0.0,
            flags: vec![false; series.len()],
            flagged_indices: Vec::new(),
            flagged_count: 0,
            flagged_percentage: 0.0,
            valid_ratio: stats::valid_ratio(series),
            sample_count: series.len(),
        }
    }

    fn from_bounds(metric: &str, method: OutlierMethod, series: &[f32], lower: f32, upper: f32) -> Self {
        let mut flags = vec![false; series.len()];
        let mut flagged_indices = Vec::new();
        for (i, &v) in series.iter().enumerate() {
            if v.is_finite() && (v < lower || v > upper) {
                flags[i] = true;
                flagged_indices.push(i);
            }
        }
        let flagged_count = flagged_indices.len();
        let flagged_percentage = if series.is_empty() {
            0.0
        } else {
            flagged_count as f64 / series.len() as f64 * 100.0
        };
        Self {
            metric: metric.to_string(),
            method,
            lower_bound: lower,
            upper_bound: upper,
            flags,
            flagged_indices,
            flagged_count,
            flagged_percentage,
            valid_ratio: stats::valid_ratio(series),
            sample_count: series.len(),
        }
    }
}

/// Side-by-side run of both methods with a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodComparison {
    pub metric: String,
    pub iqr: OutlierReport,
    pub sigma: OutlierReport,
    /// Overlap of the two flag sets, 0-100; 100 when both are empty
    pub agreement_pct: f64,
    pub skewness: f32,
    pub kurtosis: f32,
    pub recommended: OutlierMethod,
    pub reason: String,
}

/// IQR / sigma outlier detector with configured multipliers and floor
#[derive(Debug, Clone)]
pub struct OutlierDetector {
    config: AnalysisConfig,
}

impl OutlierDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Tukey-fence detection with the configured multiplier
    pub fn detect_iqr(&self, metric: &str, series: &[f32]) -> OutlierReport {
        self.detect_iqr_with(metric, series, self.config.iqr_multiplier)
    }

    /// Tukey-fence detection with an explicit multiplier (sensitivity sweeps)
    pub fn detect_iqr_with(&self, metric: &str, series: &[f32], multiplier: f32) -> OutlierReport {
        let valid = stats::finite(series);
        let Some((q1, q3)) = stats::quartiles(&valid) else {
            return OutlierReport::empty(metric, OutlierMethod::Iqr, series);
        };
        let iqr = q3 - q1;
        let lower = (q1 - multiplier * iqr).max(0.0);
        let upper = (q3 + multiplier * iqr).max(self.config.min_latency_floor_ms);
        OutlierReport::from_bounds(metric, OutlierMethod::Iqr, series, lower, upper)
    }

    /// Sigma-band detection with the configured multiplier
    pub fn detect_sigma(&self, metric: &str, series: &[f32]) -> OutlierReport {
        self.detect_sigma_with(metric, series, self.config.sigma_multiplier)
    }

    /// Sigma-band detection with an explicit multiplier
    pub fn detect_sigma_with(&self, metric: &str, series: &[f32], multiplier: f32) -> OutlierReport {
        let valid = stats::finite(series);
        if valid.is_empty() {
            return OutlierReport::empty(metric, OutlierMethod::Sigma, series);
        }
        let mean = stats::mean(&valid);
        let std = stats::stddev(&valid);
        let lower = (mean - multiplier * std).max(0.0);
        let upper = (mean + multiplier * std).max(self.config.min_latency_floor_ms);
        OutlierReport::from_bounds(metric, OutlierMethod::Sigma, series, lower, upper)
    }

    /// One-sided latency screen: only the high tail is anomalous
    ///
    /// Uses the IQR upper fence; the lower bound is pinned to zero so a
    /// fast response can never be flagged.
    pub fn detect_latency_tail(&self, metric: &str, series: &[f32]) -> OutlierReport {
        let valid = stats::finite(series);
        let Some((q1, q3)) = stats::quartiles(&valid) else {
            return OutlierReport::empty(metric, OutlierMethod::Iqr, series);
        };
        let iqr = q3 - q1;
        let upper = (q3 + self.config.iqr_multiplier * iqr).max(self.config.min_latency_floor_ms);
        OutlierReport::from_bounds(metric, OutlierMethod::Iqr, series, 0.0, upper)
    }

    /// Run both methods and recommend one
    ///
    /// IQR wins for skewed or heavy-tailed distributions; sigma wins when
    /// the methods disagree badly on a distribution with no such warning;
    /// IQR is the robust default otherwise.
    pub fn compare(&self, metric: &str, series: &[f32]) -> MethodComparison {
        let iqr = self.detect_iqr(metric, series);
        let sigma = self.detect_sigma(metric, series);

        let larger = iqr.flagged_count.max(sigma.flagged_count);
        let agreement_pct = if larger == 0 {
            100.0
        } else {
            let overlap = iqr
                .flagged_indices
                .iter()
                .filter(|i| sigma.flagged_indices.contains(i))
                .count();
            overlap as f64 / larger as f64 * 100.0
        };

        let valid = stats::finite(series);
        let skewness = stats::skewness(&valid);
        let kurtosis = stats::kurtosis(&valid);

        let (recommended, reason) = if skewness.abs() > SKEW_THRESHOLD || kurtosis > KURTOSIS_THRESHOLD {
            (
                OutlierMethod::Iqr,
                format!(
                    "distribution is skewed or heavy-tailed (skew {skewness:.2}, excess kurtosis {kurtosis:.2}); IQR fences are robust to tails"
                ),
            )
        } else if iqr.flagged_count > 2 * sigma.flagged_count
            || sigma.flagged_count > 2 * iqr.flagged_count
        {
            (
                OutlierMethod::Sigma,
                format!(
                    "methods disagree (IQR flagged {}, sigma flagged {}) on a near-normal distribution; sigma bounds track it better",
                    iqr.flagged_count, sigma.flagged_count
                ),
            )
        } else {
            (
                OutlierMethod::Iqr,
                "no distribution warning; keeping the robust IQR fences".to_string(),
            )
        };

        MethodComparison {
            metric: metric.to_string(),
            iqr,
            sigma,
            agreement_pct,
            skewness,
            kurtosis,
            recommended,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> OutlierDetector {
        OutlierDetector::new(&AnalysisConfig::default())
    }

    #[test]
    fn test_constant_series_collapses_bounds_no_flags() {
        // Constant above the floor: both methods collapse to a zero-width
        // band at the constant and flag nothing.
        let series = vec![100.0; 50];

        let iqr = detector().detect_iqr("rpc_latency_ms", &series);
        assert_eq!(iqr.lower_bound, 100.0);
        assert_eq!(iqr.upper_bound, 100.0);
        assert_eq!(iqr.flagged_count, 0);

        let sigma = detector().detect_sigma("rpc_latency_ms", &series);
        assert_eq!(sigma.lower_bound, 100.0);
        assert_eq!(sigma.upper_bound, 100.0);
        assert_eq!(sigma.flagged_count, 0);
    }

    #[test]
    fn test_injected_outliers_flagged() {
        let mut series: Vec<f32> = (0..40).map(|i| 10.0 + (i % 5) as f32).collect();
        series.push(500.0);
        series.push(800.0);

        let report = detector().detect_iqr("rpc_latency_ms", &series);
        assert_eq!(report.flagged_count, 2);
        assert_eq!(report.flagged_indices, vec![40, 41]);
        assert!(report.flags[40] && report.flags[41]);
        assert!(report.flagged_percentage > 4.0 && report.flagged_percentage < 5.0);
    }

    #[test]
    fn test_floor_prevents_degenerate_flagging() {
        // Tight distribution around 5 ms: without the 30 ms floor the fence
        // would sit near 8 ms and flag the 20 ms sample.
        let mut series = vec![4.0, 5.0, 6.0, 5.0, 4.0, 5.0, 6.0, 5.0];
        series.push(20.0);

        let report = detector().detect_iqr("rpc_latency_ms", &series);
        assert!(report.upper_bound >= 30.0);
        assert_eq!(report.flagged_count, 0);
    }

    #[test]
    fn test_iqr_count_monotone_in_multiplier() {
        let mut series: Vec<f32> = (0..60).map(|i| 40.0 + (i % 7) as f32).collect();
        series.extend([52.0, 60.0, 120.0]);

        let mut last = 0;
        for multiplier in [3.0, 1.5, 1.0, 0.5] {
            let count = detector()
                .detect_iqr_with("rpc_latency_ms", &series, multiplier)
                .flagged_count;
            assert!(
                count >= last,
                "count {count} at multiplier {multiplier} fell below {last}"
            );
            last = count;
        }
    }

    #[test]
    fn test_empty_series_no_error() {
        let report = detector().detect_iqr("rpc_latency_ms", &[]);
        assert_eq!(report.sample_count, 0);
        assert_eq!(report.flagged_count, 0);
        assert_eq!(report.valid_ratio, 0.0);
    }

    #[test]
    fn test_all_nan_reports_zero_valid_ratio() {
        let series = [f32::NAN, f32::NAN, f32::NAN];
        let report = detector().detect_sigma("rpc_latency_ms", &series);
        assert_eq!(report.flagged_count, 0);
        assert_eq!(report.valid_ratio, 0.0);
        assert_eq!(report.sample_count, 3);
    }

    #[test]
    fn test_nan_entries_never_flagged() {
        let mut series: Vec<f32> = (0..30).map(|i| 50.0 + (i % 3) as f32).collect();
        series.push(f32::NAN);
        series.push(900.0);

        let report = detector().detect_iqr("rpc_latency_ms", &series);
        assert!(!report.flags[30]);
        assert!(report.flags[31]);
        assert!(report.valid_ratio < 1.0);
    }

    #[test]
    fn test_latency_tail_ignores_low_values() {
        // 0.5 ms is far below the IQR lower fence of the 50 ms cluster but
        // the one-sided screen must not flag it.
        let mut series: Vec<f32> = (0..30).map(|i| 50.0 + (i % 3) as f32).collect();
        series.push(0.5);
        series.push(400.0);

        let report = detector().detect_latency_tail("rpc_latency_ms", &series);
        assert_eq!(report.lower_bound, 0.0);
        assert_eq!(report.flagged_indices, vec![31]);
    }

    #[test]
    fn test_compare_agreement_full_when_both_empty() {
        let series = vec![100.0; 20];
        let comparison = detector().compare("rpc_latency_ms", &series);
        assert_eq!(comparison.agreement_pct, 100.0);
    }

    #[test]
    fn test_compare_recommends_iqr_for_skewed_data() {
        // Heavy right tail
        let mut series: Vec<f32> = vec![40.0; 40];
        series.extend([45.0, 50.0, 300.0, 600.0, 1200.0]);

        let comparison = detector().compare("rpc_latency_ms", &series);
        assert_eq!(comparison.recommended, OutlierMethod::Iqr);
        assert!(comparison.skewness > 1.0);
    }
}

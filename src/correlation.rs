//! Correlation and regression between metrics and load
//!
//! Pearson coefficients with two-tailed significance, simple OLS, and
//! multiple OLS via normal equations. A pair that cannot be computed (fewer
//! than two valid points, zero variance, unresolved device column) is
//! reported as skipped with its reason - it is never silently zero.

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::sample::{DeviceRegistry, Metric, SampleBatch};
use crate::stats;

/// Pivot magnitude below which the normal-equation system is singular
const SINGULAR_EPS: f64 = 1e-12;

/// Qualitative strength bucket for |r|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationStrength {
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

/// Bucket |r| at 0.8 / 0.6 / 0.4 / 0.2
pub fn classify_strength(r_abs: f32) -> CorrelationStrength {
    if r_abs >= 0.8 {
        CorrelationStrength::VeryStrong
    } else if r_abs >= 0.6 {
        CorrelationStrength::Strong
    } else if r_abs >= 0.4 {
        CorrelationStrength::Moderate
    } else if r_abs >= 0.2 {
        CorrelationStrength::Weak
    } else {
        CorrelationStrength::VeryWeak
    }
}

/// Conventional significance stars for a p-value
pub fn significance_stars(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else {
        ""
    }
}

/// Raw Pearson test output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PearsonTest {
    pub coefficient: f32,
    pub p_value: f64,
    /// Valid pairs the test ran on
    pub pairs: usize,
}

/// One computed metric-pair correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub metric_a: String,
    pub metric_b: String,
    pub coefficient: f32,
    pub p_value: f64,
    pub strength: CorrelationStrength,
    pub significant: bool,
    /// `***` / `**` / `*` / empty
    pub stars: String,
    pub sample_count: usize,
}

/// A pair the scan could not compute, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPair {
    pub metric_a: String,
    pub metric_b: String,
    pub reason: String,
}

/// Batch correlation scan output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationScan {
    pub results: Vec<CorrelationResult>,
    pub skipped: Vec<SkippedPair>,
}

/// Simple OLS fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub observations: usize,
}

/// Multiple OLS fit with an intercept term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub response: String,
    pub predictors: Vec<String>,
    pub r_squared: f64,
    /// Intercept first, then one coefficient per predictor
    pub coefficients: Vec<f64>,
    /// Two-tailed p-value per entry of `coefficients`
    pub p_values: Vec<f64>,
    pub observations: usize,
}

/// Pairwise correlation and OLS regression over batch series
#[derive(Debug, Clone)]
pub struct CorrelationAnalyzer {
    config: AnalysisConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Pearson correlation with a two-tailed p-value (df = n - 2)
    ///
    /// Non-finite pairs are dropped first. Fewer than two valid pairs or a
    /// zero-variance side is an explicit error, never a zero coefficient.
    pub fn pearson(&self, x: &[f32], y: &[f32]) -> Result<PearsonTest> {
        let pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a as f64, b as f64))
            .collect();

        if pairs.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                required: 2,
                actual: pairs.len(),
            });
        }

        let n = pairs.len() as f64;
        let mean_x = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let mean_y = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
        let var_x = pairs.iter().map(|(a, _)| (a - mean_x).powi(2)).sum::<f64>();
        let var_y = pairs.iter().map(|(_, b)| (b - mean_y).powi(2)).sum::<f64>();

        if var_x <= 0.0 || var_y <= 0.0 {
            return Err(AnalysisError::NumericDegenerate(
                "zero variance on one side of the pair".to_string(),
            ));
        }

        let cov = pairs
            .iter()
            .map(|(a, b)| (a - mean_x) * (b - mean_y))
            .sum::<f64>();
        let r = (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0);

        let df = n - 2.0;
        let p_value = if df <= 0.0 || (1.0 - r * r) <= 0.0 {
            // Two points, or a perfect fit: the tail probability is zero
            0.0
        } else {
            let t = r * (df / (1.0 - r * r)).sqrt();
            stats::student_t_two_tailed(t, df)
        };

        Ok(PearsonTest {
            coefficient: r as f32,
            p_value,
            pairs: pairs.len(),
        })
    }

    /// Correlate two metrics of the batch into a reportable record
    pub fn analyze_pair(
        &self,
        batch: &SampleBatch,
        metric_a: &Metric,
        metric_b: &Metric,
    ) -> Result<CorrelationResult> {
        let series_a = batch.series(metric_a);
        let series_b = batch.series(metric_b);

        if stats::finite(&series_a).is_empty() {
            return Err(AnalysisError::FieldMissing(metric_a.name()));
        }
        if stats::finite(&series_b).is_empty() {
            return Err(AnalysisError::FieldMissing(metric_b.name()));
        }

        let test = self.pearson(&series_a, &series_b)?;
        Ok(CorrelationResult {
            metric_a: metric_a.name(),
            metric_b: metric_b.name(),
            coefficient: test.coefficient,
            p_value: test.p_value,
            strength: classify_strength(test.coefficient.abs()),
            significant: test.p_value < self.config.significance_level,
            stars: significance_stars(test.p_value).to_string(),
            sample_count: test.pairs,
        })
    }

    /// Correlate every requested pair, skipping what cannot be computed
    ///
    /// Device-metric pairs run only when the registry resolved the column;
    /// everything skipped is recorded with its reason and the scan goes on.
    pub fn scan(
        &self,
        batch: &SampleBatch,
        registry: &DeviceRegistry,
        pairs: &[(Metric, Metric)],
    ) -> CorrelationScan {
        let mut scan = CorrelationScan::default();

        'pairs: for (a, b) in pairs {
            for metric in [a, b] {
                if let Metric::Device { prefix, field } = metric {
                    if !registry.has_column(prefix, *field) {
                        tracing::debug!(column = %metric.name(), "skipping pair, column not in schema");
                        scan.skipped.push(SkippedPair {
                            metric_a: a.name(),
                            metric_b: b.name(),
                            reason: format!("column {} not present in this batch", metric.name()),
                        });
                        continue 'pairs;
                    }
                }
            }

            match self.analyze_pair(batch, a, b) {
                Ok(result) => scan.results.push(result),
                Err(e) => {
                    tracing::warn!("correlation {} ~ {} not computable: {}", a.name(), b.name(), e);
                    scan.skipped.push(SkippedPair {
                        metric_a: a.name(),
                        metric_b: b.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        scan
    }

    /// Simple OLS of y on x
    pub fn linear_regression(&self, x: &[f32], y: &[f32]) -> Result<LinearFit> {
        let pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a as f64, b as f64))
            .collect();

        if pairs.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                required: 2,
                actual: pairs.len(),
            });
        }

        let n = pairs.len() as f64;
        let mean_x = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let mean_y = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
        let ss_x = pairs.iter().map(|(a, _)| (a - mean_x).powi(2)).sum::<f64>();
        let ss_y = pairs.iter().map(|(_, b)| (b - mean_y).powi(2)).sum::<f64>();

        if ss_x <= 0.0 {
            return Err(AnalysisError::NumericDegenerate(
                "constant predictor".to_string(),
            ));
        }
        if ss_y <= 0.0 {
            return Err(AnalysisError::NumericDegenerate(
                "constant response".to_string(),
            ));
        }

        let cov = pairs
            .iter()
            .map(|(a, b)| (a - mean_x) * (b - mean_y))
            .sum::<f64>();
        let slope = cov / ss_x;
        let intercept = mean_y - slope * mean_x;
        let r_squared = ((cov * cov) / (ss_x * ss_y)).clamp(0.0, 1.0);

        Ok(LinearFit {
            slope,
            intercept,
            r_squared,
            observations: pairs.len(),
        })
    }

    /// Multiple OLS of y on named predictor columns, intercept included
    ///
    /// Rows with any non-finite entry are dropped. Needs at least k + 2
    /// observations for k predictors; a singular design matrix (collinear
    /// predictors) is an explicit error.
    pub fn multiple_regression(
        &self,
        response: &str,
        predictors: &[(String, Vec<f32>)],
        y: &[f32],
    ) -> Result<RegressionFit> {
        let k = predictors.len();
        if k == 0 {
            return Err(AnalysisError::FieldMissing("predictors".to_string()));
        }

        // Keep only rows where the response and every predictor are finite
        let mut rows: Vec<(Vec<f64>, f64)> = Vec::new();
        for (i, &yi) in y.iter().enumerate() {
            if !yi.is_finite() {
                continue;
            }
            let mut row = Vec::with_capacity(k + 1);
            row.push(1.0);
            let mut complete = true;
            for (_, series) in predictors {
                match series.get(i) {
                    Some(v) if v.is_finite() => row.push(*v as f64),
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                rows.push((row, yi as f64));
            }
        }

        let n = rows.len();
        if n < k + 2 {
            return Err(AnalysisError::InsufficientData {
                required: k + 2,
                actual: n,
            });
        }

        // Normal equations: (X'X) beta = X'y
        let dim = k + 1;
        let mut xtx = vec![vec![0.0f64; dim]; dim];
        let mut xty = vec![0.0f64; dim];
        for (row, yi) in &rows {
            for a in 0..dim {
                xty[a] += row[a] * yi;
                for b in 0..dim {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }

        let inv = invert(xtx).ok_or_else(|| {
            AnalysisError::NumericDegenerate("singular design matrix (collinear predictors)".to_string())
        })?;

        let coefficients: Vec<f64> = (0..dim)
            .map(|a| (0..dim).map(|b| inv[a][b] * xty[b]).sum())
            .collect();

        let mean_y = rows.iter().map(|(_, yi)| yi).sum::<f64>() / n as f64;
        let sst = rows.iter().map(|(_, yi)| (yi - mean_y).powi(2)).sum::<f64>();
        if sst <= 0.0 {
            return Err(AnalysisError::NumericDegenerate(
                "constant response".to_string(),
            ));
        }

        let sse = rows
            .iter()
            .map(|(row, yi)| {
                let fitted: f64 = row.iter().zip(&coefficients).map(|(x, c)| x * c).sum();
                (yi - fitted).powi(2)
            })
            .sum::<f64>();
        let r_squared = (1.0 - sse / sst).clamp(0.0, 1.0);

        let df = (n - k - 1) as f64;
        let s2 = sse / df;
        let p_values: Vec<f64> = coefficients
            .iter()
            .enumerate()
            .map(|(j, beta)| {
                let se = (s2 * inv[j][j].max(0.0)).sqrt();
                if se <= 0.0 {
                    // Exact fit: the coefficient is not a matter of chance
                    0.0
                } else {
                    stats::student_t_two_tailed(beta / se, df)
                }
            })
            .collect();

        Ok(RegressionFit {
            response: response.to_string(),
            predictors: predictors.iter().map(|(name, _)| name.clone()).collect(),
            r_squared,
            coefficients,
            p_values,
            observations: n,
        })
    }
}

/// Gauss-Jordan inversion with partial pivoting
fn invert(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            a[r1][col]
                .abs()
                .partial_cmp(&a[r2][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() < SINGULAR_EPS {
            return None;
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = a[col][col];
        for j in 0..n {
            a[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = a[r][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[r][j] -= factor * a[col][j];
                inv[r][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

//! Shared statistical primitives
//!
//! Basic moments go through Trueno's SIMD-accelerated `Vector`; quartiles go
//! through aprender's `DescriptiveStats` (R-7 quantile). Percentile
//! interpolation, higher moments, and the Student-t tail are computed here
//! directly - neither sister crate exposes them.
//!
//! Note: Trueno's `stddev`/`variance` are population statistics (divide by
//! n). All bounds and tests in this crate assume that convention.

use aprender::stats::DescriptiveStats;
use trueno::Vector;

/// Drop non-finite entries from a series
pub fn finite(values: &[f32]) -> Vec<f32> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Fraction of entries that are finite; 0.0 for an empty series
pub fn valid_ratio(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite(values).len() as f64 / values.len() as f64
}

/// Mean of a series, 0.0 when empty
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    Vector::from_slice(values).mean().unwrap_or(0.0)
}

/// Population standard deviation, 0.0 when fewer than two values
pub fn stddev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    Vector::from_slice(values).stddev().unwrap_or(0.0)
}

/// Maximum of a series, 0.0 when empty
pub fn max(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    Vector::from_slice(values).max().unwrap_or(0.0)
}

/// First and third quartile via aprender's R-7 quantile
pub fn quartiles(values: &[f32]) -> Option<(f32, f32)> {
    if values.is_empty() {
        return None;
    }
    let v = Vector::from_slice(values);
    let stats = DescriptiveStats::new(&v);
    let q1 = stats.quantile(0.25).ok()?;
    let q3 = stats.quantile(0.75).ok()?;
    Some((q1, q3))
}

/// Median via aprender's R-7 quantile
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let v = Vector::from_slice(values);
    let stats = DescriptiveStats::new(&v);
    stats.quantile(0.5).ok()
}

/// Linear-interpolated percentile on pre-sorted data
///
/// Trueno has no built-in percentile; this matches the interpolation used
/// for level summaries and the high-QPS window cut.
pub fn percentile_sorted(sorted: &[f32], pct: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = (index - lower as f64) as f32;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Sort a copy of the series for percentile queries
pub fn sorted(values: &[f32]) -> Vec<f32> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Skewness from population moments; 0.0 for short or flat series
pub fn skewness(values: &[f32]) -> f32 {
    if values.len() < 3 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let m2 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m3 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(3))
        .sum::<f64>()
        / n;
    (m3 / m2.powf(1.5)) as f32
}

/// Excess kurtosis from population moments; 0.0 for short or flat series
pub fn kurtosis(values: &[f32]) -> f32 {
    if values.len() < 4 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let m2 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m4 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(4))
        .sum::<f64>()
        / n;
    (m4 / (m2 * m2) - 3.0) as f32
}

/// Two-tailed p-value for a Student-t statistic with `df` degrees of freedom
///
/// p = I_x(df/2, 1/2) with x = df / (df + t^2), the regularized incomplete
/// beta function (Numerical Recipes 6.4). Used for correlation and
/// regression-coefficient significance; aprender's hypothesis module only
/// covers two-sample tests.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    incomplete_beta(df / 2.0, 0.5, df / (df + t * t)).clamp(0.0, 1.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 5, six coefficients
    const COEF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut denom = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for c in COEF {
        denom += 1.0;
        series += c / denom;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Regularized incomplete beta I_x(a, b) via Lentz's continued fraction
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - front * beta_cf(b, a, 1.0 - x) / b
    }
}

fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-12;
    const FPMIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let mf = m as f64;
        let m2 = 2.0 * mf;

        let aa = mf * (b - mf) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + mf) * (qab + mf) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

//! Descriptive statistics over sample slices.
//!
//! Functions skip `NaN` samples and return `NaN` when too few samples remain.

fn present(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Number of non-missing samples.
#[must_use]
pub fn count(values: &[f64]) -> usize {
    values.iter().filter(|v| !v.is_nan()).count()
}

/// Sum of the non-missing samples; `0` for none.
#[must_use]
pub fn sum(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    let kept = present(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Variance with `ddof` delta degrees of freedom.
#[must_use]
pub fn variance(values: &[f64], ddof: usize) -> f64 {
    let kept = present(values);
    if kept.len() <= ddof {
        return f64::NAN;
    }
    let m = kept.iter().sum::<f64>() / kept.len() as f64;
    kept.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (kept.len() - ddof) as f64
}

/// Standard deviation with `ddof` delta degrees of freedom.
#[must_use]
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    variance(values, ddof).sqrt()
}

/// Smallest sample.
#[must_use]
pub fn min(values: &[f64]) -> f64 {
    present(values).into_iter().reduce(f64::min).unwrap_or(f64::NAN)
}

/// Largest sample.
#[must_use]
pub fn max(values: &[f64]) -> f64 {
    present(values).into_iter().reduce(f64::max).unwrap_or(f64::NAN)
}

/// Largest absolute sample.
#[must_use]
pub fn abs_max(values: &[f64]) -> f64 {
    present(values)
        .into_iter()
        .map(f64::abs)
        .reduce(f64::max)
        .unwrap_or(f64::NAN)
}

/// Median, averaging the two middle samples for even counts.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    let mut kept = present(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.sort_by(f64::total_cmp);
    let mid = kept.len() / 2;
    if kept.len() % 2 == 0 {
        (kept[mid - 1] + kept[mid]) / 2.0
    } else {
        kept[mid]
    }
}

/// Square root of the mean of squares.
#[must_use]
pub fn root_mean_square(values: &[f64]) -> f64 {
    let kept = present(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    (kept.iter().map(|v| v * v).sum::<f64>() / kept.len() as f64).sqrt()
}

fn central_moments(kept: &[f64]) -> (f64, f64, f64) {
    let n = kept.len() as f64;
    let m = kept.iter().sum::<f64>() / n;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in kept {
        let d = v - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Bias-adjusted Fisher-Pearson skewness; needs three samples, `0` for constant input.
#[must_use]
pub fn skewness(values: &[f64]) -> f64 {
    let kept = present(values);
    if kept.len() < 3 {
        return f64::NAN;
    }
    let (m2, m3, _) = central_moments(&kept);
    if m2 <= f64::EPSILON * f64::EPSILON {
        return 0.0;
    }
    let n = kept.len() as f64;
    (n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5)
}

/// Bias-adjusted excess kurtosis; needs four samples, `0` for constant input.
#[must_use]
pub fn kurtosis(values: &[f64]) -> f64 {
    let kept = present(values);
    if kept.len() < 4 {
        return f64::NAN;
    }
    let (m2, _, m4) = central_moments(&kept);
    if m2 <= f64::EPSILON * f64::EPSILON {
        return 0.0;
    }
    let n = kept.len() as f64;
    let g2 = m4 / (m2 * m2) - 3.0;
    ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

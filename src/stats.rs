//! Small numeric helpers shared by the outlier filter and the serving views

/// Linear-interpolation quantile matching the numpy/pandas default
///
/// The quantile position is `q * (n - 1)` into the sorted values, with linear
/// interpolation between the two neighboring order statistics. Computed
/// directly regardless of sample count. Returns NaN for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&q));
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0)
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

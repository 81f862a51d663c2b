//! NaN-ignoring summary statistics over `f64` samples.

fn finite_sorted(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    finite.sort_by(|a, b| a.total_cmp(b));
    finite
}

/// Median of the finite values, NaN if there are none.
pub fn nan_median(values: impl IntoIterator<Item = f64>) -> f64 {
    let sorted = finite_sorted(values);
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Population standard deviation of the finite values, NaN if there are none.
pub fn nan_std(values: impl IntoIterator<Item = f64>) -> f64 {
    let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    (finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

/// Median absolute deviation from the median.
pub fn median_abs_dev(values: &[f64]) -> f64 {
    let median = nan_median(values.iter().copied());
    if median.is_nan() {
        return f64::NAN;
    }
    nan_median(values.iter().map(|v| (v - median).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_median_ignores_nan() {
        assert_eq!(nan_median([3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(nan_median([4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(nan_median([f64::NAN]).is_nan());
    }

    #[test]
    fn test_nan_std() {
        assert!((nan_std([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
        assert!(nan_std(Vec::<f64>::new()).is_nan());
    }

    #[test]
    fn test_median_abs_dev() {
        assert_eq!(median_abs_dev(&[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0]), 1.0);
    }
}

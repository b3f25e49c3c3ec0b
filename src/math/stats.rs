//! Goodness-of-fit statistics.
//!
//! All functions return `None` instead of a meaningless number (mismatched
//! lengths, too few points, zero variance, non-finite input).

/// Coefficient of determination `1 - SSE / SST`.
pub fn r_squared(y: &[f64], y_pred: &[f64]) -> Option<f64> {
    if y.len() != y_pred.len() || y.len() < 2 {
        return None;
    }
    if y.iter().chain(y_pred.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let mean = mean(y)?;
    let sst: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    if sst <= 0.0 {
        return None;
    }
    let sse: f64 = y.iter().zip(y_pred).map(|(a, b)| (a - b).powi(2)).sum();
    Some(1.0 - sse / sst)
}

/// Pearson correlation coefficient.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

pub fn mean(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    Some(v.iter().sum::<f64>() / v.len() as f64)
}

/// Standard error of the mean (sample standard deviation / √n).
pub fn sem(v: &[f64]) -> Option<f64> {
    if v.len() < 2 {
        return None;
    }
    let m = mean(v)?;
    let var = v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (v.len() as f64 - 1.0);
    Some((var / v.len() as f64).sqrt())
}

/// Value at quantile `q` in `[0, 1]` of already sorted data (linear interpolation).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn r_squared_perfect_and_mean_predictor() {
        let y = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(r_squared(&y, &y).unwrap(), 1.0);
        assert_relative_eq!(r_squared(&y, &[2.5; 4]).unwrap(), 0.0);
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        assert_eq!(r_squared(&[1.0, 1.0], &[1.0, 2.0]), None);
        assert_eq!(r_squared(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0, f64::NAN], &[1.0, 2.0]), None);
    }

    #[test]
    fn pearson_sign() {
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap(), -1.0);
    }

    #[test]
    fn sem_and_quantile() {
        assert_relative_eq!(sem(&[1.0, 3.0]).unwrap(), 1.0);
        assert_relative_eq!(quantile_sorted(&[0.0, 10.0], 0.25).unwrap(), 2.5);
    }
}

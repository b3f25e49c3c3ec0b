//! Basis functions for the linear shapes.
//!
//! - polynomial: `1, x, x², …`
//! - natural cubic spline with knots `ξ_1 < … < ξ_K` (truncated power form):
//!
//! ```text
//! N_1(x) = 1,  N_2(x) = x,  N_{k+2}(x) = d_k(x) - d_{K-1}(x)
//! d_k(x) = ((x - ξ_k)³₊ - (x - ξ_K)³₊) / (ξ_K - ξ_k)
//! ```
//!
//! The natural spline is linear beyond the boundary knots, which keeps
//! extrapolation (and leave-one-out predictions at the ends) tame.

use crate::math::stats::quantile_sorted;

/// Fill `out` with `1, x, …, x^degree`.
pub fn poly_row(x: f64, out: &mut [f64]) {
    let mut v = 1.0;
    for slot in out.iter_mut() {
        *slot = v;
        v *= x;
    }
}

fn cube_plus(v: f64) -> f64 {
    if v > 0.0 { v * v * v } else { 0.0 }
}

/// Fill `out` (length `knots.len()`) with the natural cubic spline basis at `x`.
pub fn natural_spline_row(x: f64, knots: &[f64], out: &mut [f64]) {
    let k = knots.len();
    debug_assert_eq!(out.len(), k);
    if k == 0 {
        return;
    }
    out[0] = 1.0;
    if k == 1 {
        return;
    }
    out[1] = x;
    if k == 2 {
        return;
    }

    let last = knots[k - 1];
    let d = |j: usize| (cube_plus(x - knots[j]) - cube_plus(x - last)) / (last - knots[j]);
    let d_ref = d(k - 2);
    for j in 0..k - 2 {
        out[j + 2] = d(j) - d_ref;
    }
}

/// Place up to `count` knots at evenly spaced quantiles of `xs`, deduplicated.
pub fn quantile_knots(xs: &[f64], count: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = xs.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut knots: Vec<f64> = Vec::with_capacity(count);
    for i in 0..count {
        let q = if count == 1 { 0.5 } else { i as f64 / (count - 1) as f64 };
        if let Some(v) = quantile_sorted(&sorted, q) {
            if knots.last().is_none_or(|last| v - last > 1e-9) {
                knots.push(v);
            }
        }
    }
    knots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly_row_powers() {
        let mut row = [0.0; 4];
        poly_row(2.0, &mut row);
        assert_eq!(row, [1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn natural_spline_is_linear_beyond_boundary() {
        let knots = [0.0, 1.0, 2.0, 3.0];
        let mut a = [0.0; 4];
        let mut b = [0.0; 4];
        let mut c = [0.0; 4];
        natural_spline_row(4.0, &knots, &mut a);
        natural_spline_row(5.0, &knots, &mut b);
        natural_spline_row(6.0, &knots, &mut c);
        for j in 0..4 {
            let second_diff = c[j] - 2.0 * b[j] + a[j];
            assert!(second_diff.abs() < 1e-9, "basis {j} curved beyond last knot");
        }
    }

    #[test]
    fn knots_are_sorted_and_unique() {
        let xs = [1.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let knots = quantile_knots(&xs, 5);
        assert!(knots.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(knots.first().copied(), Some(1.0));
        assert_eq!(knots.last().copied(), Some(5.0));
    }
}

//! Shape evaluation for sigmoid / polynomial / spline curves.
//!
//! The fitter relies on a few primitive operations per shape:
//! - predict `y(x)` given `theta`
//! - the sigmoid gradient `∂f/∂θ` (for Levenberg-Marquardt)
//! - a design row for the linear shapes (for least squares)
//!
//! Parameter layouts:
//! - `Sigmoid`: `[a, h, mu, w]`
//! - `Poly(d)`: `[c0, c1, …, cd]`
//! - `Spline`: `[ξ_1 … ξ_K, β_1 … β_K]` (knots, then basis coefficients)

use crate::domain::{AgeScale, ShapeKind};
use crate::math::{natural_spline_row, poly_row};

/// Number of points on the smooth curve drawn in figures.
pub const HIGH_RES_POINTS: usize = 100;

/// Fixed parameter count, if the shape has one.
///
/// Splines carry their knots in `theta`, so their length depends on the data.
pub fn n_params(shape: ShapeKind) -> Option<usize> {
    match shape {
        ShapeKind::Sigmoid => Some(4),
        ShapeKind::Poly(d) => Some(d + 1),
        ShapeKind::Spline => None,
    }
}

/// Whether `theta` fits in a fixed-size parameter tensor for Matlab export.
pub fn can_export_params(shape: ShapeKind) -> bool {
    n_params(shape).is_some()
}

/// Minimum number of points needed to fit the shape.
pub fn min_points(shape: ShapeKind) -> usize {
    match shape {
        ShapeKind::Sigmoid => 4,
        ShapeKind::Poly(d) => d + 1,
        ShapeKind::Spline => 2,
    }
}

/// Predict `y(x)`.
pub fn predict(shape: ShapeKind, theta: &[f64], x: f64) -> f64 {
    match shape {
        ShapeKind::Sigmoid => {
            let (a, h, mu, w) = (theta[0], theta[1], theta[2], theta[3]);
            a + h / (1.0 + (-(x - mu) / w).exp())
        }
        ShapeKind::Poly(_) => theta.iter().rev().fold(0.0, |acc, c| acc * x + c),
        ShapeKind::Spline => {
            let k = theta.len() / 2;
            let (knots, coefs) = theta.split_at(k);
            let mut row = vec![0.0; k];
            natural_spline_row(x, knots, &mut row);
            row.iter().zip(coefs).map(|(b, c)| b * c).sum()
        }
    }
}

pub fn predict_many(shape: ShapeKind, theta: &[f64], xs: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| predict(shape, theta, x)).collect()
}

/// Gradient of the sigmoid with respect to `[a, h, mu, w]`.
pub fn sigmoid_grad(theta: &[f64], x: f64) -> [f64; 4] {
    let (h, mu, w) = (theta[1], theta[2], theta[3]);
    let e = (-(x - mu) / w).exp();
    let denom = (1.0 + e) * (1.0 + e);
    [
        1.0,
        1.0 / (1.0 + e),
        -h / denom * e / w,
        -h / denom * e * (x - mu) / (w * w),
    ]
}

/// Default starting point for the sigmoid: baseline at the minimum, full
/// height, centered on the age range with half-range width.
pub fn sigmoid_guess(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let (x_min, x_max) = min_max(xs);
    let (y_min, y_max) = min_max(ys);
    let width = ((x_max - x_min) / 2.0).max(1e-3);
    vec![y_min, y_max - y_min, (x_min + x_max) / 2.0, width]
}

/// Fill the design row of a linear shape.
///
/// `knots` is only used by splines.
pub fn fill_design_row(shape: ShapeKind, x: f64, knots: &[f64], out: &mut [f64]) {
    match shape {
        ShapeKind::Poly(_) => poly_row(x, out),
        ShapeKind::Spline => natural_spline_row(x, knots, out),
        ShapeKind::Sigmoid => unreachable!("sigmoid is not linear in its parameters"),
    }
}

/// Evaluate the curve on a dense, evenly spaced grid spanning `xs`.
pub fn high_res_preds(shape: ShapeKind, theta: &[f64], xs: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (x_min, x_max) = min_max(xs);
    if !(x_min.is_finite() && x_max.is_finite()) {
        return (Vec::new(), Vec::new());
    }
    let n = HIGH_RES_POINTS;
    let grid: Vec<f64> = (0..n)
        .map(|i| x_min + (x_max - x_min) * i as f64 / (n - 1) as f64)
        .collect();
    let y = predict_many(shape, theta, &grid);
    (grid, y)
}

/// Short parameter summary for figure titles.
///
/// Sigmoid onset and width are reported in unscaled years.
pub fn format_params(shape: ShapeKind, theta: &[f64], scale: AgeScale) -> String {
    match shape {
        ShapeKind::Sigmoid => {
            let (a, h, mu, w) = (theta[0], theta[1], theta[2], theta[3]);
            let onset = scale.unscale(mu);
            let width = match scale {
                AgeScale::None => w.abs(),
                AgeScale::Log => scale.unscale(mu + w.abs()) - onset,
            };
            format!("a={a:.2}, h={h:.2}, onset={onset:.2}y, width={width:.2}y")
        }
        ShapeKind::Poly(_) => {
            let parts: Vec<String> = theta
                .iter()
                .enumerate()
                .map(|(i, c)| format!("c{i}={c:.3}"))
                .collect();
            parts.join(", ")
        }
        ShapeKind::Spline => format!("{} knots", theta.len() / 2),
    }
}

fn min_max(v: &[f64]) -> (f64, f64) {
    v.iter()
        .filter(|x| x.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_midpoint_is_half_height() {
        let theta = [1.0, 4.0, 10.0, 2.0];
        assert!((predict(ShapeKind::Sigmoid, &theta, 10.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_grad_matches_finite_differences() {
        let theta = [0.5, 2.0, 3.0, 1.5];
        let x = 2.2;
        let grad = sigmoid_grad(&theta, x);
        for j in 0..4 {
            let eps = 1e-6;
            let mut up = theta;
            let mut down = theta;
            up[j] += eps;
            down[j] -= eps;
            let fd = (predict(ShapeKind::Sigmoid, &up, x) - predict(ShapeKind::Sigmoid, &down, x)) / (2.0 * eps);
            assert!((fd - grad[j]).abs() < 1e-6, "param {j}: fd={fd} grad={}", grad[j]);
        }
    }

    #[test]
    fn poly_uses_horner_order() {
        // 1 + 2x + 3x^2 at x=2 -> 17
        assert_eq!(predict(ShapeKind::Poly(2), &[1.0, 2.0, 3.0], 2.0), 17.0);
    }

    #[test]
    fn high_res_grid_spans_input() {
        let (x, y) = high_res_preds(ShapeKind::Poly(1), &[0.0, 1.0], &[3.0, -1.0, 2.0]);
        assert_eq!(x.len(), HIGH_RES_POINTS);
        assert_eq!(x[0], -1.0);
        assert_eq!(*x.last().unwrap(), 3.0);
        assert_eq!(y[0], -1.0);
    }
}

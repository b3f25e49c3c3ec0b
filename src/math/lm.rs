//! Levenberg-Marquardt for small nonlinear least squares problems.
//!
//! The caller supplies a closure that evaluates the residual vector `r(θ)` and
//! its Jacobian `J = ∂r/∂θ`. Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λ D²) δ = -Jᵀ r,    D = diag(‖J_j‖)
//! ```
//!
//! as the augmented least squares problem `[J; √λ D] δ ≈ [-r; 0]`, reusing
//! the SVD solver from `ols`. Steps that do not reduce the cost are rejected
//! and λ is increased; accepted steps shrink λ.

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::math::solve_least_squares;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;
const REL_TOL: f64 = 1e-12;

/// Converged solution.
#[derive(Debug, Clone)]
pub struct LmSolution {
    pub theta: Vec<f64>,
    /// Final cost `‖r‖²`.
    pub cost: f64,
}

/// Minimize `‖r(θ)‖²` starting from `theta0`.
///
/// `eval` returns `None` when the model cannot be evaluated at `θ` (e.g.
/// non-finite values); such points are treated as rejected steps, and as an
/// error at the starting point.
pub fn levenberg_marquardt<F>(theta0: &[f64], max_iters: usize, mut eval: F) -> Result<LmSolution, FitError>
where
    F: FnMut(&[f64]) -> Option<(DVector<f64>, DMatrix<f64>)>,
{
    let p = theta0.len();
    let mut theta = theta0.to_vec();
    let (mut r, mut jac) = eval(&theta).ok_or(FitError::NonFinite)?;
    let mut cost = r.norm_squared();
    if !cost.is_finite() {
        return Err(FitError::NonFinite);
    }

    let mut lambda = LAMBDA_INIT;
    for _ in 0..max_iters {
        let n = r.len();
        let mut a = DMatrix::<f64>::zeros(n + p, p);
        let mut b = DVector::<f64>::zeros(n + p);
        a.rows_mut(0, n).copy_from(&jac);
        b.rows_mut(0, n).copy_from(&(-&r));
        let sqrt_lambda = lambda.sqrt();
        for j in 0..p {
            let scale = jac.column(j).norm().max(1e-8);
            a[(n + j, j)] = sqrt_lambda * scale;
        }

        let Some(delta) = solve_least_squares(&a, &b) else {
            lambda *= 4.0;
            if lambda > LAMBDA_MAX {
                return Err(FitError::Singular);
            }
            continue;
        };

        let candidate: Vec<f64> = theta.iter().zip(delta.iter()).map(|(t, d)| t + d).collect();
        let accepted = eval(&candidate).and_then(|(r_new, j_new)| {
            let c = r_new.norm_squared();
            (c.is_finite() && c <= cost).then_some((r_new, j_new, c))
        });

        match accepted {
            Some((r_new, j_new, cost_new)) => {
                let improvement = cost - cost_new;
                let step = delta.norm();
                let scale: f64 = theta.iter().map(|t| t * t).sum::<f64>().sqrt();
                theta = candidate;
                r = r_new;
                jac = j_new;
                cost = cost_new;
                lambda = (lambda / 3.0).max(1e-12);

                if improvement <= REL_TOL * (1.0 + cost) || step <= 1e-10 * (1.0 + scale) {
                    return Ok(LmSolution { theta, cost });
                }
            }
            None => {
                lambda *= 4.0;
                if lambda > LAMBDA_MAX {
                    // No descent direction left: we are at a (local) minimum.
                    return Ok(LmSolution { theta, cost });
                }
            }
        }
    }

    Err(FitError::NoConvergence { iters: max_iters })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exponential_decay() {
        // y = 3 exp(-0.5 x)
        let xs: Vec<f64> = (0..12).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * (-0.5 * x).exp()).collect();

        let sol = levenberg_marquardt(&[1.0, -0.1], 200, |th| {
            let n = xs.len();
            let mut r = DVector::zeros(n);
            let mut j = DMatrix::zeros(n, 2);
            for i in 0..n {
                let e = (th[1] * xs[i]).exp();
                r[i] = th[0] * e - ys[i];
                j[(i, 0)] = e;
                j[(i, 1)] = th[0] * xs[i] * e;
            }
            Some((r, j))
        })
        .unwrap();

        assert!((sol.theta[0] - 3.0).abs() < 1e-6, "{:?}", sol.theta);
        assert!((sol.theta[1] + 0.5).abs() < 1e-6, "{:?}", sol.theta);
        assert!(sol.cost < 1e-12);
    }

    #[test]
    fn unevaluable_start_is_an_error() {
        let out = levenberg_marquardt(&[0.0], 10, |_| None);
        assert_eq!(out.unwrap_err(), FitError::NonFinite);
    }
}

//! Per-series fitting.
//!
//! Given ages `x_i` and expression values `y_i`, a `Fitter`:
//! - estimates `theta` for its shape (least squares for poly/spline,
//!   Levenberg-Marquardt with restarts for the sigmoid)
//! - reports the RMS residual `sigma`
//! - computes leave-one-out predictions by refitting without each point
//!
//! Any optimization failure stays local to the series: `compute_fit` turns it
//! into a record without parameters or predictions.

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::{debug, warn};

use crate::data::Series;
use crate::domain::{FitRecord, FitterConfig, GeneRegion, ShapeKind};
use crate::error::FitError;
use crate::math::{levenberg_marquardt, quantile_knots, solve_ridge};
use crate::models::{fill_design_row, min_points, predict, predict_many, sigmoid_grad, sigmoid_guess};
use crate::util::{fnv1a64, retry, splitmix64};

/// Ridge weight (per observation) on non-constant polynomial coefficients when priors are on.
const POLY_RIDGE: f64 = 1e-4;

/// Result of fitting one series, before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub theta: Option<Vec<f64>>,
    pub sigma: Option<f64>,
    pub loo_predictions: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct Fitter {
    config: FitterConfig,
}

impl Fitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    pub fn shape(&self) -> ShapeKind {
        self.config.shape
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Fitter identity, used in cache/results paths and stored in fit records.
    pub fn cache_name(&self) -> String {
        let mut name = self.config.shape.cache_name();
        if self.config.shape == ShapeKind::Spline {
            name.push_str(&format!("-k{}", self.config.spline_knots));
        }
        if self.config.priors {
            name.push_str("-priors");
        }
        name
    }

    pub fn predict(&self, theta: &[f64], xs: &[f64]) -> Vec<f64> {
        predict_many(self.config.shape, theta, xs)
    }

    /// Fit the shape to `(xs, ys)` and return `theta`.
    pub fn fit_theta(&self, xs: &[f64], ys: &[f64], seed: u64) -> Result<Vec<f64>, FitError> {
        let need = min_points(self.config.shape);
        if xs.len() < need {
            return Err(FitError::TooFewPoints { got: xs.len(), need });
        }
        if xs.len() != ys.len() {
            return Err(FitError::Invalid("ages and values differ in length".to_string()));
        }

        let theta = match self.config.shape {
            ShapeKind::Sigmoid => retry(self.config.retries, |attempt| {
                self.fit_sigmoid(xs, ys, seed.wrapping_add(attempt as u64))
            })?,
            ShapeKind::Poly(degree) => self.fit_linear(xs, ys, &[], degree + 1)?,
            ShapeKind::Spline => {
                let knots = quantile_knots(xs, self.config.spline_knots.max(1));
                let coefs = self.fit_linear(xs, ys, &knots, knots.len())?;
                knots.into_iter().chain(coefs).collect()
            }
        };

        if theta.iter().all(|v| v.is_finite()) {
            Ok(theta)
        } else {
            Err(FitError::NonFinite)
        }
    }

    /// Overall fit plus (optionally) leave-one-out predictions.
    pub fn fit(&self, xs: &[f64], ys: &[f64], seed: u64, loo: bool) -> FitOutcome {
        let theta = self.fit_theta(xs, ys, seed);
        if let Err(e) = &theta {
            debug!(error = %e, "Overall fit failed");
        }
        let theta = theta.ok();

        let sigma = theta.as_ref().map(|th| {
            let sse: f64 = self
                .predict(th, xs)
                .iter()
                .zip(ys)
                .map(|(p, y)| (p - y).powi(2))
                .sum();
            (sse / xs.len() as f64).sqrt()
        });

        let loo_predictions = if loo {
            self.loo_predictions(xs, ys, seed)
        } else {
            vec![None; xs.len()]
        };

        FitOutcome {
            theta,
            sigma,
            loo_predictions,
        }
    }

    /// Prediction for each point from a fit to all other points.
    pub fn loo_predictions(&self, xs: &[f64], ys: &[f64], seed: u64) -> Vec<Option<f64>> {
        (0..xs.len())
            .map(|i| {
                let (x_train, y_train): (Vec<f64>, Vec<f64>) = xs
                    .iter()
                    .zip(ys)
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, (x, y))| (*x, *y))
                    .unzip();
                self.fit_theta(&x_train, &y_train, seed)
                    .ok()
                    .map(|th| predict(self.config.shape, &th, xs[i]))
                    .filter(|v| v.is_finite())
            })
            .collect()
    }

    fn fit_linear(&self, xs: &[f64], ys: &[f64], knots: &[f64], p: usize) -> Result<Vec<f64>, FitError> {
        let n = xs.len();
        let mut x = DMatrix::<f64>::zeros(n, p);
        let mut row = vec![0.0; p];
        for (i, &xi) in xs.iter().enumerate() {
            fill_design_row(self.config.shape, xi, knots, &mut row);
            for (j, v) in row.iter().enumerate() {
                x[(i, j)] = *v;
            }
        }
        let y = DVector::from_column_slice(ys);

        let penalty: Vec<f64> = match self.config.shape {
            ShapeKind::Spline => (0..p)
                .map(|j| if j >= 2 { self.config.spline_penalty * n as f64 } else { 0.0 })
                .collect(),
            _ if self.config.priors => (0..p)
                .map(|j| if j >= 1 { POLY_RIDGE * n as f64 } else { 0.0 })
                .collect(),
            _ => vec![0.0; p],
        };

        let beta = solve_ridge(&x, &y, &penalty).ok_or(FitError::Singular)?;
        Ok(beta.iter().copied().collect())
    }

    /// Best of the default start plus `restarts` jittered starts.
    fn fit_sigmoid(&self, xs: &[f64], ys: &[f64], seed: u64) -> Result<Vec<f64>, FitError> {
        let guess = sigmoid_guess(xs, ys);
        let prior = self.config.priors.then(|| SigmoidPrior::around(&guess, ys));

        let mut rng = StdRng::seed_from_u64(seed);
        let unit = Normal::new(0.0, 1.0).map_err(|e| FitError::Invalid(e.to_string()))?;
        let y_range = guess[1].abs().max(1e-6);
        let x_half = guess[3];

        let mut starts = vec![guess.clone()];
        for _ in 0..self.config.restarts {
            starts.push(vec![
                guess[0] + 0.5 * y_range * unit.sample(&mut rng),
                guess[1] * (1.0 + 0.5 * unit.sample(&mut rng)),
                guess[2] + 0.5 * x_half * unit.sample(&mut rng),
                guess[3] * (0.5 * unit.sample(&mut rng)).exp(),
            ]);
        }

        let mut best: Option<(f64, Vec<f64>)> = None;
        let mut last_err = FitError::NonFinite;
        for start in starts {
            let outcome = levenberg_marquardt(&start, self.config.max_iters, |th| {
                sigmoid_residuals(th, xs, ys, prior.as_ref())
            });
            match outcome {
                Ok(sol) => {
                    if best.as_ref().is_none_or(|(cost, _)| sol.cost < *cost) {
                        best = Some((sol.cost, sol.theta));
                    }
                }
                Err(e) => last_err = e,
            }
        }

        best.map(|(_, theta)| theta).ok_or(last_err)
    }
}

/// Gaussian prior on sigmoid parameters, expressed as extra residuals.
#[derive(Debug, Clone)]
struct SigmoidPrior {
    mean: [f64; 4],
    sigma: [f64; 4],
    /// Converts prior z-scores into the units of the data residuals.
    scale: f64,
}

impl SigmoidPrior {
    /// Weak prior centered on the default guess with data-sized spreads.
    fn around(guess: &[f64], ys: &[f64]) -> Self {
        let y_range = guess[1].abs().max(1e-6);
        let x_range = (2.0 * guess[3]).max(1e-6);
        let n = ys.len() as f64;
        let y_mean = ys.iter().sum::<f64>() / n;
        let y_std = (ys.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n).sqrt();
        Self {
            mean: [guess[0], guess[1], guess[2], guess[3]],
            sigma: [2.0 * y_range, 4.0 * y_range, x_range, x_range],
            scale: y_std.max(1e-6),
        }
    }
}

fn sigmoid_residuals(
    theta: &[f64],
    xs: &[f64],
    ys: &[f64],
    prior: Option<&SigmoidPrior>,
) -> Option<(DVector<f64>, DMatrix<f64>)> {
    let n = xs.len();
    let extra = if prior.is_some() { 4 } else { 0 };
    let mut r = DVector::<f64>::zeros(n + extra);
    let mut jac = DMatrix::<f64>::zeros(n + extra, 4);

    for i in 0..n {
        r[i] = predict(ShapeKind::Sigmoid, theta, xs[i]) - ys[i];
        let g = sigmoid_grad(theta, xs[i]);
        for j in 0..4 {
            jac[(i, j)] = g[j];
        }
    }
    if let Some(p) = prior {
        for j in 0..4 {
            r[n + j] = p.scale * (theta[j] - p.mean[j]) / p.sigma[j];
            jac[(n + j, j)] = p.scale / p.sigma[j];
        }
    }

    let finite = r.iter().all(|v| v.is_finite()) && jac.iter().all(|v| v.is_finite());
    finite.then_some((r, jac))
}

/// Deterministic per-series seed derived from the run seed and the key.
///
/// The value is stable across toolchains and platforms.
pub fn series_seed(base: u64, key: &GeneRegion) -> u64 {
    let mut bytes = Vec::with_capacity(key.gene.len() + key.region.len() + 1);
    bytes.extend_from_slice(key.gene.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(key.region.as_bytes());
    splitmix64(base ^ fnv1a64(&bytes))
}

/// Fit one series and package the outcome as an (unscored) fit record.
pub fn compute_fit(series: &Series, fitter: &Fitter, seed: u64) -> FitRecord {
    debug!(
        gene = %series.gene_name,
        region = %series.region_name,
        fitter = %fitter.cache_name(),
        "Computing fit"
    );
    let outcome = fitter.fit(
        &series.ages,
        &series.expression,
        series_seed(seed, &series.key()),
        true,
    );

    let fit_predictions = match &outcome.theta {
        Some(theta) => Some(fitter.predict(theta, &series.ages)),
        None => {
            warn!(
                gene = %series.gene_name,
                region = %series.region_name,
                fitter = %fitter.cache_name(),
                "Optimization failed during overall fit"
            );
            None
        }
    };

    FitRecord {
        fitter: fitter.cache_name(),
        seed,
        theta: outcome.theta,
        sigma: outcome.sigma,
        fit_predictions,
        loo_predictions: outcome.loo_predictions,
        fit_score: None,
        loo_score: None,
    }
}

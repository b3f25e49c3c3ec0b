//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between worker threads during the fit sweep
//! - persisted in the fit cache
//! - exported to Matlab / text / HTML

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Cache key: one (gene, region) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneRegion {
    pub gene: String,
    pub region: String,
}

impl GeneRegion {
    pub fn new(gene: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            gene: gene.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for GeneRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.gene, self.region)
    }
}

/// Fit results keyed by (gene, region).
///
/// A `BTreeMap` keeps iteration (and therefore exports and cache bytes)
/// deterministic.
pub type FitMap = BTreeMap<GeneRegion, FitRecord>;

/// Outcome of fitting one series with one fitter.
///
/// Everything except the two score fields is fixed when the record is created.
/// Scores are filled in by `fit::score::compute_scores` after the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    /// Fitter identity (its cache name).
    pub fitter: String,
    /// Configured random seed the fit was computed with.
    pub seed: u64,
    /// Fitted parameters. `None` when the overall optimization failed.
    pub theta: Option<Vec<f64>>,
    /// RMS residual of the overall fit.
    pub sigma: Option<f64>,
    /// In-sample predictions at the series ages. `None` when the fit failed.
    pub fit_predictions: Option<Vec<f64>>,
    /// Leave-one-out prediction per point (`None` where the refit failed).
    pub loo_predictions: Vec<Option<f64>>,
    pub fit_score: Option<f64>,
    pub loo_score: Option<f64>,
}

impl FitRecord {
    pub fn has_fit(&self) -> bool {
        self.theta.is_some()
    }
}

/// The k-th of n disjoint partitions of the gene × region product (k is one-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub k: usize,
    pub n: usize,
}

impl Shard {
    pub fn new(k: usize, n: usize) -> Result<Self, AppError> {
        if n == 0 || k == 0 || k > n {
            return Err(AppError::input(format!(
                "Invalid part {k}/{n}: need 1 <= k <= n."
            )));
        }
        Ok(Self { k, n })
    }

    /// Whether the item at zero-based position `index` belongs to this shard.
    pub fn contains_index(&self, index: usize) -> bool {
        index % self.n == self.k - 1
    }

    /// File-name suffix for this shard's partial cache file (`k-of-n`).
    pub fn suffix(&self) -> String {
        format!("{}-of-{}", self.k, self.n)
    }

    /// All `n` shards of a partition.
    pub fn all(n: usize) -> Vec<Shard> {
        (1..=n).map(|k| Shard { k, n }).collect()
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.k, self.n)
    }
}

impl FromStr for Shard {
    type Err = AppError;

    /// Parse `k/n`, e.g. `1/4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::input(format!("{s} is not a valid part description. Format is k/n."));
        let (k, n) = s.trim().split_once('/').ok_or_else(invalid)?;
        let k = k.trim().parse::<usize>().map_err(|_| invalid())?;
        let n = n.trim().parse::<usize>().map_err(|_| invalid())?;
        Shard::new(k, n)
    }
}

/// In-sample goodness-of-fit score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// Coefficient of determination.
    R2,
    /// Pearson correlation between observed and predicted values.
    Pearson,
}

impl ScoreKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ScoreKind::R2 => "R2",
            ScoreKind::Pearson => "r",
        }
    }
}

/// Age axis transformation applied when extracting series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgeScale {
    /// Ages are used as given (years).
    None,
    /// `ln(age + 38/52)`: log of post-conception age in years.
    Log,
}

/// Gestation offset used by `AgeScale::Log` (38 weeks, in years).
const LOG_AGE_OFFSET: f64 = 38.0 / 52.0;

impl AgeScale {
    pub fn scale(self, age: f64) -> f64 {
        match self {
            AgeScale::None => age,
            AgeScale::Log => (age + LOG_AGE_OFFSET).ln(),
        }
    }

    pub fn unscale(self, x: f64) -> f64 {
        match self {
            AgeScale::None => x,
            AgeScale::Log => x.exp() - LOG_AGE_OFFSET,
        }
    }

    /// Tag used in cache and results directory names.
    pub fn cache_tag(self) -> &'static str {
        match self {
            AgeScale::None => "raw",
            AgeScale::Log => "log",
        }
    }
}

/// Curve family used to model one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    /// `a + h / (1 + exp(-(x - mu) / w))`
    Sigmoid,
    /// Polynomial of the given degree.
    Poly(usize),
    /// Natural cubic regression spline.
    Spline,
}

impl ShapeKind {
    /// Human-readable label for plots and terminal output.
    pub fn display_name(self) -> String {
        match self {
            ShapeKind::Sigmoid => "Sigmoid".to_string(),
            ShapeKind::Poly(1) => "Linear".to_string(),
            ShapeKind::Poly(2) => "Quadratic".to_string(),
            ShapeKind::Poly(3) => "Cubic".to_string(),
            ShapeKind::Poly(d) => format!("Poly{d}"),
            ShapeKind::Spline => "Spline".to_string(),
        }
    }

    /// Name used in cache file names and on the command line.
    pub fn cache_name(self) -> String {
        match self {
            ShapeKind::Sigmoid => "sigmoid".to_string(),
            ShapeKind::Poly(d) => format!("poly{d}"),
            ShapeKind::Spline => "spline".to_string(),
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_name())
    }
}

impl FromStr for ShapeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "sigmoid" => Ok(ShapeKind::Sigmoid),
            "spline" => Ok(ShapeKind::Spline),
            _ => {
                let degree = s
                    .strip_prefix("poly")
                    .and_then(|d| d.parse::<usize>().ok())
                    .filter(|d| (1..=3).contains(d));
                degree.map(ShapeKind::Poly).ok_or_else(|| {
                    AppError::input(format!(
                        "Unknown shape '{s}'. Expected one of: sigmoid, poly1, poly2, poly3, spline."
                    ))
                })
            }
        }
    }
}

/// Run-wide settings shared by the cache, executor and scorer.
///
/// This is derived from CLI flags (plus defaults and `.env`).
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Base random seed; per-series seeds are derived from it.
    pub seed: u64,
    /// In-sample score function.
    pub score: ScoreKind,
    /// Number of fits computed between cache writes.
    pub batch_size: usize,
    /// Worker threads (`None` = all cores).
    pub jobs: Option<usize>,
    pub cache_dir: PathBuf,
    pub results_dir: PathBuf,
    /// When false, missing fits are an error instead of being computed.
    pub allow_new_computation: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            score: ScoreKind::R2,
            batch_size: 500,
            jobs: None,
            cache_dir: PathBuf::from("cache"),
            results_dir: PathBuf::from("results"),
            allow_new_computation: true,
        }
    }
}

/// Settings of the per-series optimizer.
#[derive(Debug, Clone)]
pub struct FitterConfig {
    pub shape: ShapeKind,
    /// Add Gaussian/ridge priors on the parameters.
    pub priors: bool,
    /// Extra jittered starting points for nonlinear shapes.
    pub restarts: usize,
    /// Attempts per optimization before giving up.
    pub retries: usize,
    /// Levenberg-Marquardt iteration cap.
    pub max_iters: usize,
    /// Knot count for splines.
    pub spline_knots: usize,
    /// Ridge penalty on the spline's non-linear basis terms.
    pub spline_penalty: f64,
}

impl FitterConfig {
    pub fn new(shape: ShapeKind) -> Self {
        Self {
            shape,
            priors: true,
            restarts: 4,
            retries: 3,
            max_iters: 200,
            spline_knots: 5,
            spline_penalty: 1e-3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_parses_k_of_n() {
        let shard: Shard = "2/5".parse().unwrap();
        assert_eq!(shard, Shard { k: 2, n: 5 });
        assert_eq!(shard.suffix(), "2-of-5");
        assert!("0/4".parse::<Shard>().is_err());
        assert!("5/4".parse::<Shard>().is_err());
        assert!("abc".parse::<Shard>().is_err());
    }

    #[test]
    fn shard_membership_is_positional_modulo() {
        let shard = Shard::new(2, 3).unwrap();
        let members: Vec<usize> = (0..9).filter(|&i| shard.contains_index(i)).collect();
        assert_eq!(members, vec![1, 4, 7]);
    }

    #[test]
    fn shape_parses_cli_names() {
        assert_eq!("sigmoid".parse::<ShapeKind>().unwrap(), ShapeKind::Sigmoid);
        assert_eq!("poly2".parse::<ShapeKind>().unwrap(), ShapeKind::Poly(2));
        assert_eq!("Spline".parse::<ShapeKind>().unwrap(), ShapeKind::Spline);
        assert!("poly7".parse::<ShapeKind>().is_err());
        assert_eq!(ShapeKind::Poly(3).cache_name(), "poly3");
    }

    #[test]
    fn log_age_scale_round_trips() {
        let x = AgeScale::Log.scale(10.0);
        assert!((AgeScale::Log.unscale(x) - 10.0).abs() < 1e-12);
        assert_eq!(AgeScale::None.scale(3.5), 3.5);
    }
}

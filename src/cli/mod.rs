//! Command-line parsing for the gene expression fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code. Handlers in `app` turn these structs into explicit
//! `RunConfig` / `FitterConfig` values.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::{AgeScale, ScoreKind, Shard, ShapeKind};
use crate::error::AppError;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "gexfit", version, about = "Fit developmental gene expression curves")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Default tracing filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every gene × region series (or one shard of them), then optionally
    /// write figures, HTML, a MAT-file and a theta text file.
    Fit(FitArgs),
    /// Write a synthetic dataset CSV.
    Simulate(SimulateArgs),
    /// Compare cached fits of several shapes (no new fits are computed).
    Compare(CompareArgs),
}

/// Dataset location and cache/results roots.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// Dataset CSV (columns: gene, region, age, expression, optional sample).
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    /// Dataset name used in cache and results paths (default: the file stem).
    #[arg(long)]
    pub name: Option<String>,

    /// Age scaling applied before fitting.
    #[arg(long, value_enum, default_value_t = AgeScale::Log)]
    pub age_scale: AgeScale,

    /// Re-read the CSV instead of the cached dataset snapshot.
    #[arg(long)]
    pub refresh_data: bool,

    #[arg(long, env = "GEXFIT_CACHE_DIR", default_value = "cache")]
    pub cache_dir: PathBuf,

    #[arg(long, env = "GEXFIT_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,
}

/// Optimizer settings shared by `fit` and `compare` (they select the cache).
#[derive(Debug, Args, Clone)]
pub struct FitterArgs {
    /// Disable parameter priors.
    #[arg(long)]
    pub no_priors: bool,

    /// Jittered restarts for the sigmoid optimizer.
    #[arg(long, default_value_t = 4)]
    pub restarts: usize,

    /// Knot count for splines.
    #[arg(long, default_value_t = 5)]
    pub knots: usize,

    /// Base random seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// In-sample score function.
    #[arg(long, value_enum, default_value_t = ScoreKind::R2)]
    pub score: ScoreKind,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub fitter: FitterArgs,

    /// Curve shape: sigmoid, poly1, poly2, poly3 or spline.
    #[arg(long, default_value = "sigmoid")]
    pub shape: ShapeKind,

    /// Compute only part of the series. Format: k/n, e.g. 1/4 (k = 1..n).
    #[arg(long, value_name = "K/N")]
    pub part: Option<Shard>,

    /// Write figures and the HTML report. Optionally override the output directory.
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    pub html: Option<Option<PathBuf>>,

    /// Pathways JSON (name -> gene list) for a per-pathway HTML breakdown.
    #[arg(long, value_name = "JSON", requires = "html")]
    pub pathways: Option<PathBuf>,

    /// Also save the fits as a MAT-file.
    #[arg(long)]
    pub mat: bool,

    /// Also save the fitted parameters to a text file.
    #[arg(long)]
    pub text: bool,

    /// Fits computed between cache writes.
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Worker threads (default: all cores).
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Fail instead of computing fits missing from the cache.
    #[arg(long)]
    pub no_compute: bool,
}

impl FitArgs {
    /// Reject flag combinations that cannot be honored.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.part.is_some() && self.mat {
            return Err(AppError::input("--mat cannot be used with --part"));
        }
        if self.batch_size == 0 {
            return Err(AppError::input("--batch-size must be at least 1"));
        }
        if self.jobs == Some(0) {
            return Err(AppError::input("--jobs must be at least 1"));
        }
        if self.shape == ShapeKind::Spline && self.fitter.knots < 2 {
            return Err(AppError::input("--knots must be at least 2"));
        }
        Ok(())
    }
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output CSV path.
    #[arg(long, short = 'o', value_name = "CSV")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub genes: usize,

    #[arg(long, default_value_t = 4)]
    pub regions: usize,

    /// Samples per region.
    #[arg(long, default_value_t = 30)]
    pub samples: usize,

    /// Noise standard deviation.
    #[arg(long, default_value_t = 0.3)]
    pub noise: f64,

    /// Probability that a value is missing.
    #[arg(long, default_value_t = 0.02)]
    pub missing: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct CompareArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub fitter: FitterArgs,

    /// Shapes to compare; the first is plotted against each of the others.
    #[arg(long, value_delimiter = ',', default_value = "sigmoid,spline,poly1,poly2,poly3")]
    pub shapes: Vec<ShapeKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn fit_defaults_and_part() {
        let cli = parse(&["gexfit", "fit", "--data", "d.csv", "--shape", "poly2", "--part", "2/4"]);
        assert_eq!(cli.log_level(), "info");
        let Command::Fit(args) = cli.command else { panic!("expected fit") };
        assert_eq!(args.shape, ShapeKind::Poly(2));
        assert_eq!(args.part, Some(Shard::new(2, 4).unwrap()));
        assert_eq!(args.html, None);
        assert_eq!(args.batch_size, 500);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn html_flag_with_and_without_dir() {
        let cli = parse(&["gexfit", "fit", "--data", "d.csv", "--html"]);
        let Command::Fit(args) = cli.command else { panic!("expected fit") };
        assert_eq!(args.html, Some(None));

        let cli = parse(&["gexfit", "fit", "--data", "d.csv", "--html", "out"]);
        let Command::Fit(args) = cli.command else { panic!("expected fit") };
        assert_eq!(args.html, Some(Some(PathBuf::from("out"))));
    }

    #[test]
    fn mat_with_part_is_rejected() {
        let cli = parse(&["gexfit", "fit", "--data", "d.csv", "--mat", "--part", "1/2"]);
        let Command::Fit(args) = cli.command else { panic!("expected fit") };
        let err = args.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn bad_part_and_shape_fail_to_parse() {
        assert!(Cli::try_parse_from(["gexfit", "fit", "--data", "d.csv", "--part", "5/4"]).is_err());
        assert!(Cli::try_parse_from(["gexfit", "fit", "--data", "d.csv", "--shape", "poly7"]).is_err());
    }

    #[test]
    fn compare_shape_list() {
        let cli = parse(&["gexfit", "-q", "compare", "--data", "d.csv", "--shapes", "sigmoid,poly1"]);
        assert_eq!(cli.log_level(), "warn");
        let Command::Compare(args) = cli.command else { panic!("expected compare") };
        assert_eq!(args.shapes, vec![ShapeKind::Sigmoid, ShapeKind::Poly(1)]);
    }
}

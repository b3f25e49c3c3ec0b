//! Shared fit/compare workflow used by the CLI handlers.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! dataset load -> cached/sharded fits -> scores -> figures/HTML/exports
//!
//! The handlers in `app` then only deal with presentation.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::cache::get_all_fits;
use crate::cli::{CompareArgs, DataArgs, FitArgs, FitterArgs};
use crate::data::Dataset;
use crate::domain::{FitMap, FitterConfig, RunConfig, Shard, ShapeKind};
use crate::error::{AppError, EXIT_DATA};
use crate::fit::Fitter;
use crate::io::{load_dataset, save_as_mat_file, save_theta_text_file};
use crate::plot::{
    FIGURE_SIZE, RenderStats, draw_comparison_scatter, draw_mean_scores, draw_score_densities, file_safe,
    save_gene_figures, save_score_histogram, save_series_figures, save_svg,
};
use crate::report::{ShapeComparison, compare_shapes, create_html, load_pathways, paired_loo_scores};

pub const MAT_FILE: &str = "fits.mat";
pub const THETA_FILE: &str = "theta.txt";
pub const COMPARISON_DIR: &str = "comparison";
pub const MEAN_SCORES_FILE: &str = "mean-scores.svg";
pub const DENSITY_FILE: &str = "score-density.svg";

/// All computed outputs of a single `gexfit fit` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub data: Dataset,
    pub fitter: Fitter,
    pub shard: Option<Shard>,
    pub config: RunConfig,
    pub fits: FitMap,
}

impl FitRun {
    /// Default results directory: `<results_dir>/<dataset id>/<fitter name>`.
    pub fn results_dir(&self) -> PathBuf {
        results_dir(&self.config, &self.data, &self.fitter)
    }
}

/// Paths written by `write_outputs`.
#[derive(Debug, Clone, Default)]
pub struct OutputReport {
    pub html_dir: Option<PathBuf>,
    pub series_figures: RenderStats,
    pub gene_figures: RenderStats,
    pub mat_file: Option<PathBuf>,
    pub theta_file: Option<PathBuf>,
}

pub fn results_dir(config: &RunConfig, data: &Dataset, fitter: &Fitter) -> PathBuf {
    config.results_dir.join(data.cache_id()).join(fitter.cache_name())
}

pub fn run_config(data: &DataArgs, fitter: &FitterArgs) -> RunConfig {
    RunConfig {
        seed: fitter.seed,
        score: fitter.score,
        cache_dir: data.cache_dir.clone(),
        results_dir: data.results_dir.clone(),
        ..RunConfig::default()
    }
}

pub fn fitter_config(shape: ShapeKind, args: &FitterArgs) -> FitterConfig {
    FitterConfig {
        priors: !args.no_priors,
        restarts: args.restarts,
        spline_knots: args.knots,
        ..FitterConfig::new(shape)
    }
}

pub fn load_data(args: &DataArgs, cache_dir: &Path) -> Result<Dataset, AppError> {
    let data = load_dataset(&args.data, args.name.as_deref(), args.age_scale, cache_dir, args.refresh_data)?;
    if data.gene_names.is_empty() || data.region_names.is_empty() {
        return Err(AppError::new(
            EXIT_DATA,
            format!("Dataset '{}' has no usable rows.", args.data.display()),
        ));
    }
    info!(
        dataset = %data.cache_id(),
        genes = data.gene_names.len(),
        regions = data.region_names.len(),
        max_samples = data.max_samples(),
        "Loaded dataset"
    );
    Ok(data)
}

/// Load the dataset and get (cached or new) fits for the requested shard.
pub fn run_fit(args: &FitArgs) -> Result<FitRun, AppError> {
    let config = RunConfig {
        batch_size: args.batch_size,
        jobs: args.jobs,
        allow_new_computation: !args.no_compute,
        ..run_config(&args.data, &args.fitter)
    };
    let data = load_data(&args.data, &config.cache_dir)?;
    let fitter = Fitter::new(fitter_config(args.shape, &args.fitter));

    info!(fitter = %fitter.cache_name(), shard = ?args.part.map(|s| s.to_string()), "Computing fits");
    let fits = get_all_fits(&data, &fitter, args.part, &config)?;

    Ok(FitRun {
        data,
        fitter,
        shard: args.part,
        config,
        fits,
    })
}

fn ensure_dir(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir).map_err(|e| AppError::input(format!("Failed to create '{}': {e}", dir.display())))
}

/// Write the optional outputs requested on the command line.
///
/// Figures are drawn for every run; the histogram and HTML pages need the
/// full set of fits and are only written for unsharded runs.
pub fn write_outputs(run: &FitRun, args: &FitArgs) -> Result<OutputReport, AppError> {
    let default_dir = run.results_dir();
    let mut report = OutputReport::default();

    if let Some(dir) = &args.html {
        let basedir = dir.clone().unwrap_or_else(|| default_dir.clone());
        info!(dir = %basedir.display(), "Writing figures");
        ensure_dir(&basedir)?;

        report.gene_figures = save_gene_figures(&run.data, &run.fitter, &run.fits, run.config.score, &basedir)?;
        report.series_figures = save_series_figures(&run.data, &run.fitter, &run.fits, run.config.score, &basedir)?;

        if run.shard.is_none() {
            save_score_histogram(&run.fits, &basedir)?;
            let pathways = args.pathways.as_deref().map(load_pathways).transpose()?;
            create_html(&run.data, &run.fitter, &run.fits, &basedir, pathways.as_ref())?;
            report.html_dir = Some(basedir);
        }
    }

    if args.mat {
        ensure_dir(&default_dir)?;
        let path = default_dir.join(MAT_FILE);
        save_as_mat_file(&run.data, &run.fitter, &run.fits, &path)?;
        report.mat_file = Some(path);
    }

    if args.text {
        ensure_dir(&default_dir)?;
        let path = match run.shard {
            None => default_dir.join(THETA_FILE),
            Some(s) => default_dir.join(format!("theta.{}.txt", s.suffix())),
        };
        save_theta_text_file(&run.fits, &path)?;
        report.theta_file = Some(path);
    }

    Ok(report)
}

/// Outputs of `gexfit compare`.
#[derive(Debug, Clone)]
pub struct CompareRun {
    pub rows: Vec<ShapeComparison>,
    /// Mean score bar chart.
    pub mean_scores_file: PathBuf,
    /// Score density curves of all shapes.
    pub density_file: PathBuf,
    pub scatter_files: Vec<PathBuf>,
}

/// Compare cached fits of several shapes. Missing fits are an error.
pub fn run_compare(args: &CompareArgs) -> Result<CompareRun, AppError> {
    if args.shapes.is_empty() {
        return Err(AppError::input("--shapes needs at least one shape"));
    }
    let config = RunConfig {
        allow_new_computation: false,
        ..run_config(&args.data, &args.fitter)
    };
    let data = load_data(&args.data, &config.cache_dir)?;

    let mut named: Vec<(String, FitMap)> = Vec::with_capacity(args.shapes.len());
    for &shape in &args.shapes {
        let fitter = Fitter::new(fitter_config(shape, &args.fitter));
        let fits = get_all_fits(&data, &fitter, None, &config)?;
        named.push((fitter.cache_name(), fits));
    }
    let rows = compare_shapes(&named);

    let dir = config.results_dir.join(data.cache_id()).join(COMPARISON_DIR);
    ensure_dir(&dir)?;

    let bars: Vec<(String, f64, f64)> = rows
        .iter()
        .filter_map(|r| Some((r.name.clone(), r.mean?, r.sem.unwrap_or(0.0))))
        .collect();
    let mean_scores_file = dir.join(MEAN_SCORES_FILE);
    save_svg(&mean_scores_file, FIGURE_SIZE, |area| draw_mean_scores(area, &bars))?;

    let densities: Vec<(String, Vec<f64>)> = named
        .iter()
        .map(|(name, fits)| (name.clone(), fits.values().filter_map(|r| r.loo_score).collect()))
        .collect();
    let density_file = dir.join(DENSITY_FILE);
    save_svg(&density_file, FIGURE_SIZE, |area| draw_score_densities(area, &densities))?;
    info!(dir = %dir.display(), "Saved comparison figures");

    let mut scatter_files = Vec::new();
    if let Some(((first_name, first_fits), others)) = named.split_first() {
        for (name, fits) in others {
            let pairs = paired_loo_scores(first_fits, fits);
            let path = dir.join(format!("scatter-{}-{}.svg", file_safe(first_name), file_safe(name)));
            save_svg(&path, FIGURE_SIZE, |area| draw_comparison_scatter(area, first_name, name, &pairs))?;
            info!(path = %path.display(), pairs = pairs.len(), "Saved comparison scatter");
            scatter_files.push(path);
        }
    }

    Ok(CompareRun {
        rows,
        mean_scores_file,
        density_file,
        scatter_files,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cache::FitCache;
    use crate::cli::{Cli, Command};
    use crate::data::{SimulationConfig, simulate, write_measurements_csv};
    use crate::plot::HISTOGRAM_FILE;
    use crate::report::{CSS_FILE, HTML_FILE};

    fn write_dataset(dir: &Path) -> PathBuf {
        let cfg = SimulationConfig {
            genes: 3,
            regions: 2,
            samples: 12,
            missing_prob: 0.0,
            ..SimulationConfig::default()
        };
        let rows = simulate(&cfg).unwrap();
        let path = dir.join("toy.csv");
        write_measurements_csv(&path, &rows).unwrap();
        path
    }

    fn fit_args(dir: &Path, csv: &Path, extra: &[&str]) -> FitArgs {
        let cache = dir.join("cache");
        let results = dir.join("results");
        let mut argv: Vec<String> = vec![
            "gexfit".into(),
            "fit".into(),
            "--data".into(),
            csv.display().to_string(),
            "--cache-dir".into(),
            cache.display().to_string(),
            "--results-dir".into(),
            results.display().to_string(),
            "--shape".into(),
            "poly1".into(),
            "--batch-size".into(),
            "2".into(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Fit(args) => args,
            _ => panic!("expected fit"),
        }
    }

    #[test]
    fn full_run_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_dataset(dir.path());
        let args = fit_args(dir.path(), &csv, &["--html", "--mat", "--text"]);
        args.validate().unwrap();

        let run = run_fit(&args).unwrap();
        assert_eq!(run.fits.len(), 6);
        let report = write_outputs(&run, &args).unwrap();

        let out = run.results_dir();
        assert_eq!(report.html_dir.as_deref(), Some(out.as_path()));
        assert_eq!(report.series_figures.written, 6);
        assert_eq!(report.gene_figures.written, 3);
        for file in [HTML_FILE, CSS_FILE, HISTOGRAM_FILE, MAT_FILE, THETA_FILE] {
            assert!(out.join(file).is_file(), "missing {file}");
        }
    }

    #[test]
    fn shards_then_strict_unsharded_run() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_dataset(dir.path());

        for part in ["1/2", "2/2"] {
            let args = fit_args(dir.path(), &csv, &["--part", part, "--html", "--text"]);
            let run = run_fit(&args).unwrap();
            assert_eq!(run.fits.len(), 3);
            let report = write_outputs(&run, &args).unwrap();
            assert!(report.html_dir.is_none());
            assert!(report.theta_file.unwrap().to_string_lossy().ends_with(&format!(
                "theta.{}.txt",
                part.replace('/', "-of-")
            )));
        }

        let args = fit_args(dir.path(), &csv, &["--no-compute"]);
        let run = run_fit(&args).unwrap();
        assert_eq!(run.fits.len(), 6);

        let cache = FitCache::for_run(&run.config.cache_dir, &run.data.cache_id(), &run.fitter.cache_name());
        assert!(cache.partial_files().is_empty());
    }

    #[test]
    fn compare_needs_cached_fits() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_dataset(dir.path());
        let cache = dir.path().join("cache");
        let results = dir.path().join("results");

        let compare = |shapes: &str| {
            let argv: Vec<String> = vec![
                "gexfit".into(),
                "compare".into(),
                "--data".into(),
                csv.display().to_string(),
                "--cache-dir".into(),
                cache.display().to_string(),
                "--results-dir".into(),
                results.display().to_string(),
                "--shapes".into(),
                shapes.to_string(),
            ];
            match Cli::try_parse_from(argv).unwrap().command {
                Command::Compare(args) => run_compare(&args),
                _ => panic!("expected compare"),
            }
        };

        let err = compare("poly1,poly2").unwrap_err();
        assert_eq!(err.exit_code(), EXIT_DATA);

        for shape in ["poly1", "poly2"] {
            let mut args = fit_args(dir.path(), &csv, &[]);
            args.shape = shape.parse().unwrap();
            run_fit(&args).unwrap();
        }
        let out = compare("poly1,poly2").unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.scatter_files.len(), 1);
        assert!(out.scatter_files[0].is_file());
        assert!(out.mean_scores_file.is_file());
        assert!(out.density_file.is_file());
        assert_eq!(out.density_file.parent(), out.scatter_files[0].parent());
    }
}

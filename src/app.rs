//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - initializes logging
//! - dispatches to the fit / simulate / compare handlers

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Command, CompareArgs, FitArgs, SimulateArgs};
use crate::data::{SimulationConfig, simulate, write_measurements_csv};
use crate::error::AppError;
use crate::report::{format_comparison, format_fit_summary, summarize};

pub mod pipeline;

/// Series listed in the run summary.
const SUMMARY_TOP_N: usize = 10;

/// Entry point for the `gexfit` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; it only supplies directory defaults.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level());

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Compare(args) => handle_compare(args),
    }
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn configure_threads(jobs: Option<usize>) {
    let Some(jobs) = jobs else { return };
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global() {
        warn!(error = %e, "Could not size the global thread pool");
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    args.validate()?;
    configure_threads(args.jobs);

    let run = pipeline::run_fit(&args)?;
    let summary = summarize(&run.fits, SUMMARY_TOP_N);
    println!("{}", format_fit_summary(&run.data, &run.fitter, run.shard, &summary));

    let report = pipeline::write_outputs(&run, &args)?;
    if let Some(dir) = &report.html_dir {
        println!("HTML: {}", dir.join(crate::report::HTML_FILE).display());
    }
    if let Some(path) = &report.mat_file {
        println!("MAT-file: {}", path.display());
    }
    if let Some(path) = &report.theta_file {
        println!("Theta: {}", path.display());
    }
    let failed = report.series_figures.failed + report.gene_figures.failed;
    if failed > 0 {
        warn!(failed, "Some figures could not be drawn");
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = SimulationConfig {
        genes: args.genes,
        regions: args.regions,
        samples: args.samples,
        noise: args.noise,
        missing_prob: args.missing,
        seed: args.seed,
        ..SimulationConfig::default()
    };
    let rows = simulate(&config)?;
    write_measurements_csv(&args.out, &rows)?;
    info!(path = %args.out.display(), rows = rows.len(), "Wrote synthetic dataset");
    println!("Wrote {} rows to {}", rows.len(), args.out.display());
    Ok(())
}

fn handle_compare(args: CompareArgs) -> Result<(), AppError> {
    let out = pipeline::run_compare(&args)?;
    println!("{}", format_comparison(&out.rows));
    println!("Mean scores: {}", out.mean_scores_file.display());
    println!("Density: {}", out.density_file.display());
    for path in &out.scatter_files {
        println!("Scatter: {}", path.display());
    }
    Ok(())
}

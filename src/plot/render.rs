//! Render the figure set of a results directory.
//!
//! Layout under the results directory:
//!
//! ```text
//! gene-region-fits/fit-<gene>-<region>.svg   one figure per fitted series (plus a
//!                                            hash when a name needed escaping)
//! gene-subplot/<gene>.svg                    one grid per gene
//! R2-hist.svg                                LOO score histogram
//! ```
//!
//! Series and gene figures that already exist are skipped; the rest render in
//! parallel.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::data::Dataset;
use crate::domain::{FitMap, GeneRegion, ScoreKind};
use crate::error::AppError;
use crate::fit::Fitter;
use crate::plot::{
    FIGURE_SIZE, GENE_FIGURE_SIZE, draw_gene, draw_score_histogram, draw_series_fit, save_svg,
};
use crate::util::fnv1a64;

pub const SERIES_DIR: &str = "gene-region-fits";
pub const GENE_DIR: &str = "gene-subplot";
pub const HISTOGRAM_FILE: &str = "R2-hist.svg";

/// Outcome counts of one rendering pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Make a gene/region name safe to use as (part of) a file name.
///
/// Only ASCII alphanumerics, `_` and `.` survive, so `-` is free to separate
/// the parts of a figure name.
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.') { c } else { '_' })
        .collect()
}

/// `-`-joined file stem for `parts`. When sanitizing changed any part, a hash
/// of the raw names is appended so distinct keys never share a file.
fn figure_stem(parts: &[&str]) -> String {
    let safe: Vec<String> = parts.iter().map(|p| file_safe(p)).collect();
    let mut stem = safe.join("-");
    if parts.iter().zip(&safe).any(|(raw, s)| *raw != s.as_str()) {
        let hash = fnv1a64(parts.join("\0").as_bytes());
        stem.push_str(&format!("-{:08x}", hash as u32));
    }
    stem
}

/// Series figure path, relative to the results directory.
pub fn series_figure_rel(key: &GeneRegion) -> String {
    format!("{SERIES_DIR}/fit-{}.svg", figure_stem(&[&key.gene, &key.region]))
}

/// Gene figure path, relative to the results directory.
pub fn gene_figure_rel(gene: &str) -> String {
    format!("{GENE_DIR}/{}.svg", figure_stem(&[gene]))
}

fn ensure_dir(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::input(format!("Failed to create figure dir '{}': {e}", dir.display())))
}

fn collect_stats(results: Vec<Result<(), AppError>>, skipped: usize) -> RenderStats {
    let mut stats = RenderStats {
        skipped,
        ..RenderStats::default()
    };
    for r in results {
        match r {
            Ok(()) => stats.written += 1,
            Err(e) => {
                warn!(error = %e, "Figure failed");
                stats.failed += 1;
            }
        }
    }
    stats
}

/// One figure per fit in `fits`.
pub fn save_series_figures(
    data: &Dataset,
    fitter: &Fitter,
    fits: &FitMap,
    score: ScoreKind,
    basedir: &Path,
) -> Result<RenderStats, AppError> {
    ensure_dir(&basedir.join(SERIES_DIR))?;

    let mut skipped = 0;
    let mut jobs = Vec::new();
    for (key, record) in fits {
        let path = basedir.join(series_figure_rel(key));
        if path.is_file() {
            debug!(key = %key, "Figure already exists, skipping");
            skipped += 1;
            continue;
        }
        jobs.push((key, record, path));
    }

    info!(figures = jobs.len(), skipped, "Rendering series figures");
    let results: Vec<Result<(), AppError>> = jobs
        .par_iter()
        .map(|(key, record, path)| {
            let series = data.series(key);
            save_svg(path, FIGURE_SIZE, |area| {
                draw_series_fit(area, &series, fitter.shape(), Some(*record), score, false)
            })
        })
        .collect();
    Ok(collect_stats(results, skipped))
}

/// One subplot grid per gene that has fits in `fits`.
///
/// Genes are taken from the fits rather than the dataset, so a shard run
/// only draws its own genes.
pub fn save_gene_figures(
    data: &Dataset,
    fitter: &Fitter,
    fits: &FitMap,
    score: ScoreKind,
    basedir: &Path,
) -> Result<RenderStats, AppError> {
    ensure_dir(&basedir.join(GENE_DIR))?;

    let genes: BTreeSet<&str> = fits.keys().map(|k| k.gene.as_str()).collect();
    let mut skipped = 0;
    let mut jobs: Vec<(&str, PathBuf)> = Vec::new();
    for gene in genes {
        let path = basedir.join(gene_figure_rel(gene));
        if path.is_file() {
            debug!(gene, "Figure already exists, skipping");
            skipped += 1;
            continue;
        }
        jobs.push((gene, path));
    }

    info!(figures = jobs.len(), skipped, "Rendering gene figures");
    let results: Vec<Result<(), AppError>> = jobs
        .par_iter()
        .map(|(gene, path)| {
            let panels: Vec<_> = data
                .region_names
                .iter()
                .map(|region| GeneRegion::new(*gene, region))
                .map(|key| (data.series(&key), fits.get(&key)))
                .filter(|(series, _)| !series.is_empty())
                .collect();
            save_svg(path, GENE_FIGURE_SIZE, |area| draw_gene(area, gene, &panels, fitter.shape(), score))
        })
        .collect();
    Ok(collect_stats(results, skipped))
}

/// LOO score histogram over all fits (always redrawn).
pub fn save_score_histogram(fits: &FitMap, basedir: &Path) -> Result<PathBuf, AppError> {
    ensure_dir(basedir)?;
    let path = basedir.join(HISTOGRAM_FILE);
    let scores: Vec<Option<f64>> = fits.values().map(|r| r.loo_score).collect();
    save_svg(&path, FIGURE_SIZE, |area| draw_score_histogram(area, &scores))?;
    info!(path = %path.display(), "Saved score histogram");
    Ok(path)
}

//! Batched parallel computation of missing fits.
//!
//! `get_all_fits` is the single entry point used by the CLI:
//!
//! 1. select the keys of this shard (all keys when unsharded)
//! 2. merge whatever the cache already holds for them
//! 3. compute the missing ones in batches on a rayon pool, saving after each
//!    batch so an interrupted run resumes where it stopped
//! 4. score everything

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::info;

use crate::cache::{FitCache, shard_keys};
use crate::data::{Dataset, Series};
use crate::domain::{FitMap, FitRecord, GeneRegion, RunConfig, Shard};
use crate::error::{AppError, EXIT_DATA, EXIT_INTERNAL};
use crate::fit::{Fitter, compute_fit, compute_scores};

/// Return scored fits for every key of `shard`, computing what the cache lacks.
pub fn get_all_fits(
    data: &Dataset,
    fitter: &Fitter,
    shard: Option<Shard>,
    config: &RunConfig,
) -> Result<FitMap, AppError> {
    get_all_fits_with(data, fitter, shard, config, |series| {
        compute_fit(series, fitter, config.seed)
    })
}

/// `get_all_fits` with a caller-supplied per-series computation.
pub fn get_all_fits_with<F>(
    data: &Dataset,
    fitter: &Fitter,
    shard: Option<Shard>,
    config: &RunConfig,
    compute: F,
) -> Result<FitMap, AppError>
where
    F: Fn(&Series) -> FitRecord + Sync + Send,
{
    let cache = FitCache::for_run(&config.cache_dir, &data.cache_id(), &fitter.cache_name());
    cache.ensure_dir()?;

    let keys = shard_keys(data.gene_regions(), shard);
    let wanted: HashSet<GeneRegion> = keys.iter().cloned().collect();
    let mut fits = cache.read_all(&wanted, shard.is_none())?;

    let missing: Vec<GeneRegion> = keys.into_iter().filter(|k| !fits.contains_key(k)).collect();
    match shard {
        Some(s) => info!(shard = %s, total = wanted.len(), missing = missing.len(), "Fits for shard"),
        None => info!(total = wanted.len(), missing = missing.len(), "Fits for dataset"),
    }

    if !missing.is_empty() {
        if !config.allow_new_computation {
            return Err(AppError::new(
                EXIT_DATA,
                format!(
                    "{} fits are missing from '{}' and new computation is disabled",
                    missing.len(),
                    cache.base_path().display()
                ),
            ));
        }

        let pool = build_pool(config.jobs)?;
        let batch_size = config.batch_size.max(1);
        let n_batches = missing.len().div_ceil(batch_size);

        for (i, batch) in missing.chunks(batch_size).enumerate() {
            info!(batch = i + 1, of = n_batches, size = batch.len(), "Computing batch of fits");
            let computed: Vec<(GeneRegion, FitRecord)> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|key| (key.clone(), compute(&data.series(key))))
                    .collect()
            });
            fits.extend(computed);
            let path = cache.save(&fits, shard)?;
            info!(path = %path.display(), fits = fits.len(), "Saved fits");
        }
    }

    compute_scores(data, config.score, &mut fits);
    Ok(fits)
}

fn build_pool(jobs: Option<usize>) -> Result<rayon::ThreadPool, AppError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
        .map_err(|e| AppError::new(EXIT_INTERNAL, format!("Failed to start worker pool: {e}")))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::Measurement;
    use crate::domain::{FitterConfig, ShapeKind};

    fn dataset() -> Dataset {
        let mut rows = Vec::new();
        for g in 0..3 {
            for r in 0..2 {
                for s in 0..6 {
                    rows.push(Measurement {
                        gene: format!("G{g}"),
                        region: format!("R{r}"),
                        sample: Some(format!("s{s}")),
                        age: s as f64,
                        expression: Some(g as f64 + 0.5 * s as f64),
                    });
                }
            }
        }
        Dataset::from_measurements("toy", rows)
    }

    fn config(dir: &Path) -> RunConfig {
        RunConfig {
            batch_size: 2,
            jobs: Some(2),
            cache_dir: dir.to_path_buf(),
            results_dir: dir.join("results"),
            ..RunConfig::default()
        }
    }

    fn fitter() -> Fitter {
        Fitter::new(FitterConfig::new(ShapeKind::Poly(1)))
    }

    fn fake_record(series: &Series) -> FitRecord {
        FitRecord {
            fitter: "poly1-priors".to_string(),
            seed: 0,
            theta: Some(vec![0.0, 0.5]),
            sigma: Some(0.0),
            fit_predictions: Some(series.expression.clone()),
            loo_predictions: series.expression.iter().copied().map(Some).collect(),
            fit_score: None,
            loo_score: None,
        }
    }

    #[test]
    fn second_run_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset();
        let cfg = config(dir.path());
        let calls = AtomicUsize::new(0);
        let counting = |s: &Series| {
            calls.fetch_add(1, Ordering::SeqCst);
            fake_record(s)
        };

        let first = get_all_fits_with(&data, &fitter(), None, &cfg, counting).unwrap();
        assert_eq!(first.len(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let second = get_all_fits_with(&data, &fitter(), None, &cfg, counting).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(second, first);
    }

    #[test]
    fn shards_then_consolidate() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset();
        let cfg = config(dir.path());
        let calls = AtomicUsize::new(0);
        let counting = |s: &Series| {
            calls.fetch_add(1, Ordering::SeqCst);
            fake_record(s)
        };

        for shard in Shard::all(4) {
            let fits = get_all_fits_with(&data, &fitter(), Some(shard), &cfg, counting).unwrap();
            let expected = shard_keys(data.gene_regions(), Some(shard));
            assert!(expected.iter().all(|k| fits.contains_key(k)));
            assert_eq!(fits.len(), expected.len());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let cache = FitCache::for_run(dir.path(), &data.cache_id(), &fitter().cache_name());
        assert_eq!(cache.partial_files().len(), 4);

        let strict = RunConfig {
            allow_new_computation: false,
            ..cfg.clone()
        };
        let all = get_all_fits_with(&data, &fitter(), None, &strict, counting).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(cache.partial_files().is_empty());
        assert!(cache.base_path().is_file());
    }

    #[test]
    fn missing_fits_without_computation_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            allow_new_computation: false,
            ..config(dir.path())
        };
        let err = get_all_fits_with(&dataset(), &fitter(), None, &cfg, fake_record).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_DATA);
    }

    #[test]
    fn returned_fits_are_scored() {
        let dir = tempfile::tempdir().unwrap();
        let fits = get_all_fits_with(&dataset(), &fitter(), None, &config(dir.path()), fake_record).unwrap();
        for record in fits.values() {
            assert_eq!(record.fit_score, Some(1.0));
            assert_eq!(record.loo_score, Some(1.0));
        }
    }

    #[test]
    fn real_fitter_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset();
        let fits = get_all_fits(&data, &fitter(), None, &config(dir.path())).unwrap();
        assert_eq!(fits.len(), 6);
        for record in fits.values() {
            assert!(record.has_fit());
            assert!(record.fit_score.unwrap() > 0.99);
        }
    }
}

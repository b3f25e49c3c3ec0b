//! On-disk fit cache.
//!
//! Layout for one (dataset, fitter) pair:
//!
//! ```text
//! <cache_dir>/<dataset id>/<fitter name>.bin          consolidated cache
//! <cache_dir>/<dataset id>/<fitter name>.bin.2-of-4   partial cache of shard 2/4
//! ```
//!
//! Every file is a bincode-encoded `CacheFile`. Reading is deliberately
//! lenient: a missing, unreadable or undecodable file is an empty map, so a
//! stale or corrupt shard only costs recomputation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{FitMap, GeneRegion, Shard};
use crate::error::AppError;

/// Bumped whenever the record layout changes; older files read as empty.
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    fits: FitMap,
}

/// Handle on the cache files of one (dataset, fitter) pair.
#[derive(Debug, Clone)]
pub struct FitCache {
    base: PathBuf,
}

impl FitCache {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn for_run(cache_dir: &Path, dataset_id: &str, fitter_name: &str) -> Self {
        Self::new(cache_dir.join(dataset_id).join(format!("{fitter_name}.bin")))
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// File written by a run over `shard` (the base file when unsharded).
    pub fn path_for(&self, shard: Option<Shard>) -> PathBuf {
        match shard {
            None => self.base.clone(),
            Some(s) => {
                let mut name = self.base.as_os_str().to_owned();
                name.push(format!(".{}", s.suffix()));
                PathBuf::from(name)
            }
        }
    }

    /// Create the directory holding the cache files.
    pub fn ensure_dir(&self) -> Result<(), AppError> {
        if let Some(dir) = self.base.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| AppError::input(format!("Failed to create cache dir '{}': {e}", dir.display())))?;
        }
        Ok(())
    }

    /// Sibling files whose name extends the base file name (shard partials).
    pub fn partial_files(&self) -> Vec<PathBuf> {
        let (Some(dir), Some(base_name)) = (self.base.parent(), self.base.file_name()) else {
            return Vec::new();
        };
        let base_name = base_name.to_string_lossy();
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut out: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with(base_name.as_ref()) && n != base_name)
            })
            .collect();
        out.sort();
        out
    }

    /// Write `fits` for `shard` (wholesale replace). Returns the written path.
    pub fn save(&self, fits: &FitMap, shard: Option<Shard>) -> Result<PathBuf, AppError> {
        let path = self.path_for(shard);
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            fits: fits.clone(),
        };
        let bytes = bincode::serialize(&file)
            .map_err(|e| AppError::input(format!("Failed to encode fit cache: {e}")))?;

        // Write next to the target under a hidden name (which never matches the
        // base prefix), then rename over the target.
        let tmp = temp_path(&path);
        fs::write(&tmp, bytes)
            .map_err(|e| AppError::input(format!("Failed to write fit cache '{}': {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(AppError::input(format!(
                "Failed to replace fit cache '{}': {e}",
                path.display()
            )));
        }

        debug!(path = %path.display(), fits = fits.len(), "Saved fits");
        Ok(path)
    }

    /// Merge the base file and all partial files, keep only `keys`, and
    /// optionally consolidate into the base file.
    ///
    /// Files are merged oldest first, so on conflicting keys the most recently
    /// modified file wins. With `consolidate`, the merged map is written to the
    /// base file and the partial files are deleted afterwards.
    pub fn read_all(&self, keys: &HashSet<GeneRegion>, consolidate: bool) -> Result<FitMap, AppError> {
        let partials = self.partial_files();

        let mut files: Vec<PathBuf> = partials.clone();
        files.push(self.base.clone());
        let mut files: Vec<(SystemTime, PathBuf)> = files
            .into_iter()
            .filter(|p| p.is_file())
            .map(|p| (modified_time(&p), p))
            .collect();
        files.sort();

        if !self.base.is_file() {
            info!(path = %self.base.display(), "No cache file");
        }

        let mut fits = FitMap::new();
        for (_, path) in &files {
            fits.extend(read_one_cache_file(path));
        }
        fits.retain(|key, _| keys.contains(key));

        if consolidate {
            self.save(&fits, None)?;
            for path in &partials {
                match fs::remove_file(path) {
                    Ok(()) => info!(path = %path.display(), "Removed consolidated partial cache"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial cache"),
                }
            }
        }

        Ok(fits)
    }
}

/// Read one cache file. Any failure yields an empty map.
pub fn read_one_cache_file(path: &Path) -> FitMap {
    if !path.is_file() {
        debug!(path = %path.display(), "No cache file");
        return FitMap::new();
    }
    debug!(path = %path.display(), "Reading fits");

    let decoded = fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| bincode::deserialize::<CacheFile>(&bytes).map_err(|e| e.to_string()));

    match decoded {
        Ok(file) if file.version == CACHE_FORMAT_VERSION => {
            info!(path = %path.display(), fits = file.fits.len(), "Found fits");
            file.fits
        }
        Ok(file) => {
            warn!(
                path = %path.display(),
                version = file.version,
                expected = CACHE_FORMAT_VERSION,
                "Ignoring cache file with another format version"
            );
            FitMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read fits");
            FitMap::new()
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitRecord;

    fn record(tag: f64) -> FitRecord {
        FitRecord {
            fitter: "poly1".to_string(),
            seed: 0,
            theta: Some(vec![tag, 0.0]),
            sigma: Some(0.0),
            fit_predictions: Some(vec![tag]),
            loo_predictions: vec![Some(tag)],
            fit_score: None,
            loo_score: None,
        }
    }

    fn map(entries: &[(&str, &str, f64)]) -> FitMap {
        entries
            .iter()
            .map(|(g, r, t)| (GeneRegion::new(*g, *r), record(*t)))
            .collect()
    }

    fn keys(m: &FitMap) -> HashSet<GeneRegion> {
        m.keys().cloned().collect()
    }

    #[test]
    fn shard_path_appends_suffix() {
        let cache = FitCache::new("/tmp/c/sigmoid.bin");
        let path = cache.path_for(Some(Shard::new(3, 8).unwrap()));
        assert_eq!(path, PathBuf::from("/tmp/c/sigmoid.bin.3-of-8"));
        assert_eq!(cache.path_for(None), PathBuf::from("/tmp/c/sigmoid.bin"));
    }

    #[test]
    fn merging_disjoint_files_yields_union() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        let a = map(&[("G1", "R1", 1.0), ("G1", "R2", 2.0)]);
        let b = map(&[("G2", "R1", 3.0)]);
        cache.save(&a, None).unwrap();
        cache.save(&b, Some(Shard::new(1, 2).unwrap())).unwrap();

        let mut all = a.clone();
        all.extend(b.clone());
        let merged = cache.read_all(&keys(&all), false).unwrap();
        assert_eq!(merged, all);
        // Without consolidation the partial stays.
        assert_eq!(cache.partial_files().len(), 1);
    }

    #[test]
    fn merge_restricts_to_requested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        cache.save(&map(&[("G1", "R1", 1.0), ("G2", "R1", 2.0)]), None).unwrap();

        let wanted: HashSet<GeneRegion> = [GeneRegion::new("G2", "R1")].into_iter().collect();
        let merged = cache.read_all(&wanted, false).unwrap();
        assert_eq!(keys(&merged), wanted);
    }

    #[test]
    fn newest_file_wins_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        let old = map(&[("G", "R", 1.0)]);
        let new = map(&[("G", "R", 2.0)]);
        let shard = Shard::new(1, 2).unwrap();
        cache.save(&old, None).unwrap();
        cache.save(&new, Some(shard)).unwrap();

        // Make the ordering explicit regardless of filesystem timestamp granularity.
        let past = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        let f = fs::OpenOptions::new().write(true).open(cache.base_path()).unwrap();
        f.set_modified(past).unwrap();

        let merged = cache.read_all(&keys(&old), false).unwrap();
        assert_eq!(merged, new);
    }

    #[test]
    fn consolidation_removes_partials() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        let parts = [map(&[("G1", "R1", 1.0)]), map(&[("G2", "R1", 2.0)])];
        for (i, part) in parts.iter().enumerate() {
            cache.save(part, Some(Shard::new(i + 1, 2).unwrap())).unwrap();
        }

        let mut all = FitMap::new();
        for part in &parts {
            all.extend(part.clone());
        }
        let merged = cache.read_all(&keys(&all), true).unwrap();
        assert_eq!(merged, all);
        assert!(cache.partial_files().is_empty());
        assert_eq!(read_one_cache_file(cache.base_path()), all);
    }

    #[test]
    fn failed_consolidation_keeps_partials() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        let part = map(&[("G1", "R1", 1.0)]);
        cache.save(&part, Some(Shard::new(1, 2).unwrap())).unwrap();
        // A directory in place of the base file makes the consolidated write fail.
        fs::create_dir(cache.base_path()).unwrap();

        let partials = cache.partial_files();
        assert_eq!(partials.len(), 1);
        assert!(cache.read_all(&keys(&part), true).is_err());
        assert_eq!(cache.partial_files(), partials);
        assert_eq!(read_one_cache_file(&partials[0]), part);
        assert!(!temp_path(cache.base_path()).exists());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poly1.bin");
        fs::write(&path, b"definitely not bincode").unwrap();
        assert!(read_one_cache_file(&path).is_empty());
        assert!(read_one_cache_file(&dir.path().join("missing.bin")).is_empty());
    }

    #[test]
    fn temp_file_is_not_a_partial() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(dir.path().join("poly1.bin"));
        fs::write(temp_path(cache.base_path()), b"x").unwrap();
        assert!(cache.partial_files().is_empty());
    }
}

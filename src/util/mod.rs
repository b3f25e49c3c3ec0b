//! Small higher-order helpers used across the pipeline.
//!
//! - `retry`: call a fallible closure up to N times
//! - `cached`: memoize a computation's result in a binary file on disk
//! - `fnv1a64` / `splitmix64`: fixed hashes for seeds and file keys (stable
//!   across toolchains, unlike `DefaultHasher`)

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::AppError;

/// Call `f` up to `attempts` times, returning the first success or the last error.
///
/// The closure receives the zero-based attempt index so callers can vary their
/// inputs (e.g. a seed) between attempts. `attempts == 0` is treated as 1.
pub fn retry<T, E, F>(attempts: usize, mut f: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match f(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 >= attempts => return Err(e),
            Err(_) => attempt += 1,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash of `bytes`.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// SplitMix64 finalizer: scrambles `x` into a well-mixed 64-bit value.
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Return the value stored at `path`, or compute it with `compute` and store it.
///
/// `force` skips the stored value and recomputes. An unreadable stored value is
/// recomputed too.
pub fn cached<T, F>(path: &Path, name: &str, force: bool, compute: F) -> Result<T, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, AppError>,
{
    if !force && path.is_file() {
        match fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| bincode::deserialize::<T>(&bytes).map_err(|e| e.to_string()))
        {
            Ok(value) => {
                info!(path = %path.display(), "Loading {name} from cache");
                return Ok(value);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable cached {name}"),
        }
    }

    let value = compute()?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", dir.display())))?;
    }
    let bytes = bincode::serialize(&value)
        .map_err(|e| AppError::input(format!("Failed to serialize {name}: {e}")))?;
    fs::write(path, bytes)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))?;
    debug!(path = %path.display(), "Saved {name}");

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn splitmix_is_fixed() {
        assert_eq!(splitmix64(0), 0xe220_a839_7b1d_cdaf);
        assert_ne!(splitmix64(1), splitmix64(2));
    }

    #[test]
    fn retry_returns_first_success() {
        let calls = Cell::new(0);
        let out: Result<usize, &str> = retry(5, |i| {
            calls.set(calls.get() + 1);
            if i < 2 { Err("boom") } else { Ok(i) }
        });
        assert_eq!(out, Ok(2));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_with_last_error() {
        let out: Result<(), usize> = retry(3, Err);
        assert_eq!(out, Err(2));
    }

    #[test]
    fn cached_computes_once_then_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("value.bin");
        let calls = Cell::new(0);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(vec![1.5_f64, 2.5])
        };
        let a: Vec<f64> = cached(&path, "value", false, compute).unwrap();
        let b: Vec<f64> = cached(&path, "value", false, compute).unwrap();
        assert_eq!(a, b);
        assert_eq!(calls.get(), 1);

        let _: Vec<f64> = cached(&path, "value", true, compute).unwrap();
        assert_eq!(calls.get(), 2);
    }
}

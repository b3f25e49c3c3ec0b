//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - cache keys and fit records (`GeneRegion`, `FitRecord`, `FitMap`)
//! - shard descriptors (`Shard`)
//! - configuration enums (`ScoreKind`, `AgeScale`, `ShapeKind`)
//! - explicit run/fitter configuration objects (`RunConfig`, `FitterConfig`)

pub mod types;

pub use types::*;

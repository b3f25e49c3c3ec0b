//! Expression data: the in-memory dataset and a synthetic generator.

pub mod dataset;
pub mod sample;

pub use dataset::*;
pub use sample::*;

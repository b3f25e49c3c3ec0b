//! Input/output helpers.
//!
//! - CSV ingest + dataset loading (`ingest`)
//! - theta text export (`export`)
//! - MAT-file export (`matlab`)

pub mod export;
pub mod ingest;
pub mod matlab;

pub use export::*;
pub use ingest::*;
pub use matlab::*;

//! Curve fitting and scoring.
//!
//! Responsibilities:
//!
//! - fit one series with one shape (`fitter`)
//! - leave-one-out predictions
//! - in-sample and LOO scores (`score`)

pub mod fitter;
pub mod score;

pub use fitter::*;
pub use score::*;

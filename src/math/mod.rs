//! Mathematical utilities: basis functions, least squares, Levenberg-Marquardt
//! and fit statistics.

pub mod basis;
pub mod lm;
pub mod ols;
pub mod stats;

pub use basis::*;
pub use lm::*;
pub use ols::*;

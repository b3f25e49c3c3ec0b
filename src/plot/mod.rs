//! Figures for fitted series (SVG via Plotters).
//!
//! - drawing primitives for series, gene grids and score distributions (`figures`)
//! - batch rendering into a results directory (`render`)

pub mod figures;
pub mod render;

pub use figures::*;
pub use render::*;

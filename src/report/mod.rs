//! Reporting: terminal summaries and the HTML report.

pub mod format;
pub mod html;

pub use format::*;
pub use html::*;

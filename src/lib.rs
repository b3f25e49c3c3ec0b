//! `gexfit` library crate.
//!
//! The binary (`gexfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the cache/shard machinery is reusable from other drivers
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cache;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod util;

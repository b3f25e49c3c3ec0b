//! Fit cache, sharding and the batch executor.

pub mod executor;
pub mod shard;
pub mod store;

pub use executor::*;
pub use shard::*;
pub use store::*;

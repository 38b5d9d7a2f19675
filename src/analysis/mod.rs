//! Result aggregation and classification.

pub mod aggregator;
pub mod classify;

pub use aggregator::*;
pub use classify::{ClassificationPolicy, TieredPolicy};

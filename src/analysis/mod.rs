//! Analysis modules.
//!
//! Payload normalization and statistics aggregation.

pub mod aggregator;
pub mod normalizer;

pub use aggregator::{compute_statistics, group_by_verdict, FraudSummary, StatisticsAggregator};
pub use normalizer::normalize;

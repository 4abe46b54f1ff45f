//! OptiAgent - invoice fraud-analysis agents.
//!
//! Tracks analysis executions through their lifecycle, normalizes the
//! engine's loosely structured payloads into canonical fraud reports and
//! keeps per-user statistics consistent with the stored records.

pub mod analysis;
pub mod documents;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod results;
pub mod store;
pub mod tracker;
pub mod users;

pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use store::Store;

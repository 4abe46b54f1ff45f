//! Remote fraud-analysis engine.
//!
//! This module provides the HTTP client used by `analyze` and the trait the
//! pipeline drives it through.

pub mod client;

pub use client::{EngineClient, EngineConfig};

use crate::models::{RawPayload, StoredDocument};
use std::future::Future;

/// Something that turns an agent's documents into a raw analysis payload.
pub trait FraudEngine {
    fn detect(
        &self,
        invoices: &[StoredDocument],
        mission_order: &StoredDocument,
    ) -> impl Future<Output = anyhow::Result<RawPayload>> + Send;
}

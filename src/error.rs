//! Error types for the execution pipeline.

use std::fmt;

/// Kind of record a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Agent,
    Execution,
    FraudReport,
    User,
    Document,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Agent => write!(f, "agent"),
            RecordKind::Execution => write!(f, "execution"),
            RecordKind::FraudReport => write!(f, "fraud report"),
            RecordKind::User => write!(f, "user"),
            RecordKind::Document => write!(f, "document"),
        }
    }
}

/// All errors surfaced by the registry, tracker, result store and aggregator.
///
/// The normalizer has no variant here: malformed payloads degrade to
/// absent fields instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A referenced agent, execution, report, user or document does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// A transition out of a terminal state, or a malformed request.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Snapshot file could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Snapshot file could not be encoded or decoded.
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for `NotFound` errors of any kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }

    /// True for rejected transitions and malformed requests.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, PipelineError::InvalidState(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

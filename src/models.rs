//! Data models for agents, executions, fraud reports and users.
//!
//! This module contains the records kept by the store and shared by the
//! registry, the execution tracker, the result store and the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::analysis::normalizer;

/// Raw analysis payload as returned by the fraud-analysis engine.
pub type RawPayload = Map<String, Value>;

/// Generate a new time-ordered record identifier.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Aggregate counters embedded in a user record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    pub total_agents: u64,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
}

impl UserStatistics {
    /// Executions that have not reached a terminal state yet.
    pub fn pending_executions(&self) -> u64 {
        self.total_executions
            .saturating_sub(self.successful_executions + self.failed_executions)
    }

    /// `successful + failed <= total`.
    pub fn is_consistent(&self) -> bool {
        self.successful_executions + self.failed_executions <= self.total_executions
    }

    /// Share of resolved executions that completed, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        let resolved = self.successful_executions + self.failed_executions;
        if resolved == 0 {
            return None;
        }
        Some(self.successful_executions as f64 / resolved as f64 * 100.0)
    }
}

/// A user account with its denormalized statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub statistics: UserStatistics,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            email: email.into(),
            created_at: now,
            updated_at: now,
            statistics: UserStatistics::default(),
        }
    }
}

/// An automated fraud-analysis agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    /// Owning user. Never reassigned once set.
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub invoice_file_ids: BTreeSet<String>,
    #[serde(default)]
    pub mission_order_id: Option<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            role: role.into(),
            user_id,
            created_at: Utc::now(),
            invoice_file_ids: BTreeSet::new(),
            mission_order_id: None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Status of an execution.
///
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[serde(alias = "EN_COURS")]
    Running,
    #[serde(alias = "TERMINÉ", alias = "TERMINE")]
    Completed,
    #[serde(alias = "ÉCHOUÉ", alias = "ECHOUE")]
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Completed => write!(f, "COMPLETED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One run of an agent's analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    /// Set exactly when `status` is terminal.
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub notes: Option<String>,
}

impl Execution {
    pub fn start(agent_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            user_id,
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            notes: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Duration between start and end, if the execution has ended.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Yes/no/unknown reading of a fraud flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FraudVerdict {
    Yes,
    No,
    Unknown,
}

impl FraudVerdict {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|f| f.trim().to_lowercase()).as_deref() {
            Some("oui") | Some("yes") | Some("true") => FraudVerdict::Yes,
            Some("non") | Some("no") | Some("false") => FraudVerdict::No,
            _ => FraudVerdict::Unknown,
        }
    }
}

impl fmt::Display for FraudVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FraudVerdict::Yes => write!(f, "Yes"),
            FraudVerdict::No => write!(f, "No"),
            FraudVerdict::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Canonical fields extracted from a raw analysis payload.
///
/// A field the payload does not carry stays `None`; placeholders are only
/// applied when rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFields {
    pub fraud_flag: Option<String>,
    pub merchant_name: Option<String>,
    pub invoice_date: Option<String>,
    pub total_amount: Option<f64>,
    pub city: Option<String>,
    pub full_address: Option<String>,
    #[serde(default)]
    pub fraud_reasons: Vec<String>,
}

impl CanonicalFields {
    pub fn verdict(&self) -> FraudVerdict {
        FraudVerdict::from_flag(self.fraud_flag.as_deref())
    }

    /// True when nothing could be extracted.
    pub fn is_empty(&self) -> bool {
        *self == CanonicalFields::default()
    }
}

/// Canonical outcome of one submitted analysis payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudReport {
    pub id: String,
    pub execution_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    raw_payload: RawPayload,
    #[serde(flatten)]
    fields: CanonicalFields,
}

impl FraudReport {
    /// Build a report for `execution`, deriving canonical fields from `raw`.
    pub fn new(execution: &Execution, raw: RawPayload) -> Self {
        let fields = normalizer::normalize(&raw);
        Self {
            id: new_id(),
            execution_id: execution.id.clone(),
            agent_id: execution.agent_id.clone(),
            user_id: execution.user_id.clone(),
            created_at: Utc::now(),
            raw_payload: raw,
            fields,
        }
    }

    pub fn raw_payload(&self) -> &RawPayload {
        &self.raw_payload
    }

    pub fn fields(&self) -> &CanonicalFields {
        &self.fields
    }

    pub fn verdict(&self) -> FraudVerdict {
        self.fields.verdict()
    }

    /// Swap the raw payload and re-derive every canonical field from it.
    pub fn replace_payload(&mut self, raw: RawPayload) {
        self.fields = normalizer::normalize(&raw);
        self.raw_payload = raw;
    }

    /// Re-derive the canonical fields from the stored payload. `true` when
    /// they had drifted.
    pub(crate) fn renormalize(&mut self) -> bool {
        let fields = normalizer::normalize(&self.raw_payload);
        let drifted = fields != self.fields;
        self.fields = fields;
        drifted
    }
}

/// What a stored document is attached to an agent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    MissionOrder,
}

/// Descriptive fields of a mission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDetails {
    pub mission_name: Option<String>,
    pub client_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// An uploaded invoice or mission order owned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub agent_id: String,
    pub kind: DocumentKind,
    pub file_name: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission: Option<MissionDetails>,
}

/// Document bytes as sent by an uploader.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

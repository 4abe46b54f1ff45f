//! Fraud report documents.
//!
//! A [`ReportDocument`] gathers the fraud reports of one execution, agent
//! or user together with their summary; [`generator`] renders it as
//! Markdown or JSON.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report};

use crate::analysis::FraudSummary;
use crate::error::Result;
use crate::models::{Agent, Execution, FraudReport, User, UserStatistics};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Text shown in place of a field the payload did not carry.
pub const DEFAULT_PLACEHOLDER: &str = "inconnu";

/// What a document reports on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subject {
    Execution {
        execution: Execution,
        agent: Option<Agent>,
    },
    Agent {
        agent: Agent,
        executions: Vec<Execution>,
    },
    User {
        user: User,
        agents: Vec<Agent>,
        statistics: UserStatistics,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub generated_at: DateTime<Utc>,
    pub subject: Subject,
    pub summary: FraudSummary,
    pub reports: Vec<FraudReport>,
}

impl ReportDocument {
    fn new(subject: Subject, reports: Vec<FraudReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            summary: FraudSummary::from_reports(&reports),
            subject,
            reports,
        }
    }

    /// Reports of one execution, in submission order.
    pub fn for_execution(pipeline: &Pipeline, execution_id: &str) -> Result<Self> {
        let execution = pipeline.executions().get(execution_id)?;
        let agent = pipeline.agents().get(&execution.agent_id).ok();
        let reports = pipeline.results().list_by_execution(execution_id);
        Ok(Self::new(Subject::Execution { execution, agent }, reports))
    }

    /// Every report of an agent, newest first.
    pub fn for_agent(pipeline: &Pipeline, agent_id: &str) -> Result<Self> {
        let agent = pipeline.agents().get(agent_id)?;
        let executions = pipeline.executions().list_by_agent(agent_id);
        let reports = pipeline.results().list_by_agent(agent_id);
        Ok(Self::new(Subject::Agent { agent, executions }, reports))
    }

    /// Every report attributed to a user, with their cached statistics.
    pub fn for_user(pipeline: &Pipeline, user_id: &str) -> Result<Self> {
        let user = pipeline.users().get(user_id)?;
        let statistics = user.statistics;
        let agents = pipeline.agents().list_by_user(user_id);
        let reports = pipeline.results().list_by_user(user_id);
        Ok(Self::new(
            Subject::User {
                user,
                agents,
                statistics,
            },
            reports,
        ))
    }
}

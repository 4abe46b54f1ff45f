//! User statistics and fraud-report aggregation.
//!
//! User counters are a denormalized cache. The increment/decrement methods
//! are the fast path applied as agents and executions come and go;
//! [`StatisticsAggregator::recompute`] rebuilds the counters from the agent
//! and execution collections and is the source of truth.

use crate::error::{PipelineError, RecordKind, Result};
use crate::models::{Agent, Execution, ExecutionStatus, FraudReport, FraudVerdict, UserStatistics};
use crate::store::{read, write, Store};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maintains the statistics embedded in user records.
#[derive(Debug, Clone)]
pub struct StatisticsAggregator {
    store: Arc<Store>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn increment_agent_count(&self, user_id: &str) {
        self.update(user_id, "agent created", |s| s.total_agents += 1);
    }

    /// Floors at zero.
    pub fn decrement_agent_count(&self, user_id: &str) {
        self.update(user_id, "agent deleted", |s| {
            s.total_agents = s.total_agents.saturating_sub(1)
        });
    }

    pub fn record_execution_started(&self, user_id: &str) {
        self.update(user_id, "execution started", |s| s.total_executions += 1);
    }

    pub fn record_execution_succeeded(&self, user_id: &str) {
        self.update(user_id, "execution completed", |s| {
            s.successful_executions += 1
        });
    }

    pub fn record_execution_failed(&self, user_id: &str) {
        self.update(user_id, "execution failed", |s| s.failed_executions += 1);
    }

    /// Current cached counters of a user.
    pub fn statistics(&self, user_id: &str) -> Result<UserStatistics> {
        read(&self.store.users)
            .get(user_id)
            .map(|user| user.statistics)
            .ok_or_else(|| PipelineError::not_found(RecordKind::User, user_id))
    }

    /// Rebuild a user's counters from the agent and execution collections.
    ///
    /// The result reflects the collections as of the moment they were read.
    pub fn recompute(&self, user_id: &str) -> Result<UserStatistics> {
        if !read(&self.store.users).contains_key(user_id) {
            return Err(PipelineError::not_found(RecordKind::User, user_id));
        }

        let stats = {
            let agents = read(&self.store.agents);
            let executions = read(&self.store.executions);
            compute_statistics(user_id, agents.values(), executions.values())
        };

        let mut users = write(&self.store.users);
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::User, user_id))?;

        if user.statistics != stats {
            debug!(
                "Statistics drift for user {}: cached {:?}, recomputed {:?}",
                user_id, user.statistics, stats
            );
        }
        user.statistics = stats;
        user.updated_at = Utc::now();

        info!(
            "Statistics for user {}: {} agents, {} executions, {} successful, {} failed",
            user_id,
            stats.total_agents,
            stats.total_executions,
            stats.successful_executions,
            stats.failed_executions
        );

        Ok(stats)
    }

    /// Atomic read-modify-write of one user's counters.
    fn update(&self, user_id: &str, event: &str, apply: impl FnOnce(&mut UserStatistics)) {
        let mut users = write(&self.store.users);
        match users.get_mut(user_id) {
            Some(user) => {
                apply(&mut user.statistics);
                user.updated_at = Utc::now();
                debug!("Statistics of user {} updated ({})", user_id, event);
            }
            None => warn!("User {} not found, statistics not updated ({})", user_id, event),
        }
    }
}

/// Count a user's agents and executions by status.
pub fn compute_statistics<'a>(
    user_id: &str,
    agents: impl IntoIterator<Item = &'a Agent>,
    executions: impl IntoIterator<Item = &'a Execution>,
) -> UserStatistics {
    let mut stats = UserStatistics {
        total_agents: agents.into_iter().filter(|a| a.is_owned_by(user_id)).count() as u64,
        ..UserStatistics::default()
    };

    for execution in executions {
        if execution.user_id.as_deref() != Some(user_id) {
            continue;
        }
        stats.total_executions += 1;
        match execution.status {
            ExecutionStatus::Completed => stats.successful_executions += 1,
            ExecutionStatus::Failed => stats.failed_executions += 1,
            ExecutionStatus::Running => {}
        }
    }

    stats
}

/// Summary of a set of fraud reports.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudSummary {
    pub total: usize,
    pub flagged: usize,
    pub cleared: usize,
    pub unknown: usize,
    /// Sum of the amounts of flagged reports that carry one.
    pub flagged_amount: f64,
    pub by_reason: HashMap<String, usize>,
    pub by_city: HashMap<String, usize>,
}

impl FraudSummary {
    pub fn from_reports(reports: &[FraudReport]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };

        for report in reports {
            let fields = report.fields();
            match report.verdict() {
                FraudVerdict::Yes => {
                    summary.flagged += 1;
                    summary.flagged_amount += fields.total_amount.unwrap_or(0.0);
                }
                FraudVerdict::No => summary.cleared += 1,
                FraudVerdict::Unknown => summary.unknown += 1,
            }

            for reason in &fields.fraud_reasons {
                *summary.by_reason.entry(reason.clone()).or_default() += 1;
            }
            if let Some(city) = &fields.city {
                *summary.by_city.entry(city.clone()).or_default() += 1;
            }
        }

        summary
    }

    /// Most frequent reasons, most common first, ties by name.
    pub fn top_reasons(&self, n: usize) -> Vec<(String, usize)> {
        let mut reasons: Vec<_> = self
            .by_reason
            .iter()
            .map(|(reason, count)| (reason.clone(), *count))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        reasons.truncate(n);
        reasons
    }
}

/// Group reports by verdict.
pub fn group_by_verdict(reports: &[FraudReport]) -> HashMap<FraudVerdict, Vec<&FraudReport>> {
    let mut grouped: HashMap<FraudVerdict, Vec<&FraudReport>> = HashMap::new();

    for report in reports {
        grouped.entry(report.verdict()).or_default().push(report);
    }

    grouped
}

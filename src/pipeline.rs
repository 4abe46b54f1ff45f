//! Pipeline facade.
//!
//! Wires the services over one shared [`Store`] and owns the flows that
//! span several of them: submitting payloads, running an analysis against
//! the remote engine, and cascading deletions.

use crate::analysis::StatisticsAggregator;
use crate::engine::FraudEngine;
use crate::error::{PipelineError, RecordKind, Result};
use crate::models::{Agent, Execution, FraudReport, RawPayload, User, UserStatistics};
use crate::registry::AgentRegistry;
use crate::results::ResultStore;
use crate::store::{Cascade, Store};
use crate::tracker::ExecutionTracker;
use crate::users::UserDirectory;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What an agent deletion took with it.
#[derive(Debug, Clone)]
pub struct AgentRemoval {
    pub agent: Agent,
    pub executions: usize,
    pub reports: usize,
}

/// What a user deletion took with it.
#[derive(Debug, Clone)]
pub struct UserRemoval {
    pub user: User,
    pub agents: usize,
    pub executions: usize,
    pub reports: usize,
}

/// Outcome of [`Pipeline::analyze`].
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Recorded(FraudReport),
    Failed(Execution),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<Store>,
    users: UserDirectory,
    agents: AgentRegistry,
    tracker: ExecutionTracker,
    results: ResultStore,
    stats: StatisticsAggregator,
}

impl Pipeline {
    pub fn new(store: Arc<Store>) -> Self {
        let stats = StatisticsAggregator::new(store.clone());
        let tracker = ExecutionTracker::new(store.clone(), stats.clone());
        Self {
            users: UserDirectory::new(store.clone()),
            agents: AgentRegistry::new(store.clone(), stats.clone()),
            results: ResultStore::new(store.clone(), tracker.clone()),
            tracker,
            stats,
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn executions(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn statistics(&self) -> &StatisticsAggregator {
        &self.stats
    }

    pub fn start_execution(&self, agent_id: &str, user_id: Option<&str>) -> Result<Execution> {
        self.tracker.start(agent_id, user_id)
    }

    pub fn submit_payload(&self, execution_id: &str, raw: RawPayload) -> Result<FraudReport> {
        self.results.record(execution_id, raw)
    }

    pub fn fail_execution(&self, execution_id: &str, error_message: &str) -> Result<Execution> {
        self.tracker.fail(execution_id, error_message)
    }

    pub fn recompute_statistics(&self, user_id: &str) -> Result<UserStatistics> {
        self.stats.recompute(user_id)
    }

    /// Run one analysis of an agent's documents.
    ///
    /// The agent needs at least one invoice and a mission order; otherwise
    /// `InvalidState` is returned and no execution is started. An execution
    /// is started, the documents are sent to `engine`, and the answer is
    /// recorded. An engine error fails the execution with the
    /// error text as its notes; that is an `Ok(AnalysisOutcome::Failed)`.
    pub async fn analyze<E: FraudEngine>(
        &self,
        engine: &E,
        agent_id: &str,
        user_id: Option<&str>,
    ) -> Result<AnalysisOutcome> {
        let invoices = self.agents.invoices(agent_id)?;
        if invoices.is_empty() {
            return Err(PipelineError::InvalidState(format!(
                "agent {} has no invoices to analyze",
                agent_id
            )));
        }
        let mission_order = self.agents.mission_order(agent_id)?.ok_or_else(|| {
            PipelineError::InvalidState(format!("agent {} has no mission order", agent_id))
        })?;

        let execution = self.tracker.start(agent_id, user_id)?;
        info!(
            "Analyzing {} invoice(s) of agent {} in execution {}",
            invoices.len(),
            agent_id,
            execution.id
        );

        match engine.detect(&invoices, &mission_order).await {
            Ok(raw) => Ok(AnalysisOutcome::Recorded(
                self.results.record(&execution.id, raw)?,
            )),
            Err(e) => {
                error!("Analysis of execution {} failed: {:#}", execution.id, e);
                let failed = self.tracker.fail(&execution.id, &format!("{:#}", e))?;
                Ok(AnalysisOutcome::Failed(failed))
            }
        }
    }

    /// Delete an agent with its reports, executions and documents, then
    /// bring the affected users' statistics back in line.
    pub fn delete_agent(&self, agent_id: &str) -> Result<AgentRemoval> {
        let purged = self.store.cascade(Cascade::Agent(agent_id));
        let mut affected = purged.affected_users;
        let agent = purged
            .agents
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

        if let Some(owner) = &agent.user_id {
            self.stats.decrement_agent_count(owner);
            affected.insert(owner.clone());
        }
        self.recompute_all(&affected);

        info!(
            "Deleted agent {} with {} execution(s) and {} report(s)",
            agent_id, purged.executions, purged.reports
        );
        Ok(AgentRemoval {
            agent,
            executions: purged.executions,
            reports: purged.reports,
        })
    }

    /// Delete a user, the agents they own and everything attached to those
    /// agents or attributed to the user.
    pub fn delete_user(&self, user_id: &str) -> Result<UserRemoval> {
        self.users.get(user_id)?;

        let purged = self.store.cascade(Cascade::User(user_id));
        let mut affected = purged.affected_users;
        affected.remove(user_id);
        self.recompute_all(&affected);

        let user = purged
            .user
            .ok_or_else(|| PipelineError::not_found(RecordKind::User, user_id))?;
        let agents = purged.agents.len();

        info!(
            "Deleted user {} with {} agent(s), {} execution(s) and {} report(s)",
            user_id, agents, purged.executions, purged.reports
        );
        Ok(UserRemoval {
            user,
            agents,
            executions: purged.executions,
            reports: purged.reports,
        })
    }

    /// Delete one execution and its reports. `false` if it did not exist.
    pub fn delete_execution(&self, execution_id: &str) -> bool {
        let owner = match self.tracker.get(execution_id) {
            Ok(execution) => execution.user_id,
            Err(_) => return false,
        };

        if !self.tracker.delete(execution_id) {
            return false;
        }
        if let Some(owner) = owner {
            self.recompute_all(&BTreeSet::from([owner]));
        }
        true
    }

    fn recompute_all(&self, user_ids: &BTreeSet<String>) {
        for user_id in user_ids {
            match self.stats.recompute(user_id) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Statistics of user {} not recomputed: {}", user_id, e),
            }
        }
    }
}

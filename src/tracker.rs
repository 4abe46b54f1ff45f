//! Execution tracker.
//!
//! Owns execution records and is the only writer of their status and
//! timestamps. An execution starts `RUNNING` and moves exactly once to
//! `COMPLETED` or `FAILED`:
//!
//! ```text
//! RUNNING ──complete──▶ COMPLETED
//!    └─────fail───────▶ FAILED
//! ```
//!
//! The status check and the transition happen under the executions write
//! lock, so of two racing `complete`/`fail` calls on the same execution
//! exactly one succeeds and only that one touches the owner's counters.

use crate::analysis::StatisticsAggregator;
use crate::error::{PipelineError, RecordKind, Result};
use crate::models::{Execution, ExecutionStatus};
use crate::store::{read, write, Store};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    store: Arc<Store>,
    stats: StatisticsAggregator,
}

impl ExecutionTracker {
    pub fn new(store: Arc<Store>, stats: StatisticsAggregator) -> Self {
        Self { store, stats }
    }

    /// Start a `RUNNING` execution for an existing agent.
    ///
    /// The owner's total-execution counter is bumped right away. The agents
    /// read lock is held until then, so an agent deletion sees either the
    /// whole start or none of it.
    pub fn start(&self, agent_id: &str, user_id: Option<&str>) -> Result<Execution> {
        let user_id = user_id.filter(|u| !u.is_empty()).map(str::to_string);
        let execution = Execution::start(agent_id, user_id);

        {
            let agents = read(&self.store.agents);
            if !agents.contains_key(agent_id) {
                return Err(PipelineError::not_found(RecordKind::Agent, agent_id));
            }
            write(&self.store.executions).insert(execution.id.clone(), execution.clone());

            if let Some(user) = &execution.user_id {
                self.stats.record_execution_started(user);
            }
        }

        info!("Started execution {} for agent {}", execution.id, agent_id);
        Ok(execution)
    }

    /// Mark a running execution `COMPLETED`.
    pub fn complete(&self, execution_id: &str, summary: &str, notes: &str) -> Result<Execution> {
        let mut executions = write(&self.store.executions);
        self.transition_locked(
            &mut executions,
            execution_id,
            ExecutionStatus::Completed,
            Some(summary.to_string()),
            Some(notes.to_string()),
        )
    }

    /// Mark a running execution `FAILED`, keeping the error message in its notes.
    pub fn fail(&self, execution_id: &str, error_message: &str) -> Result<Execution> {
        let mut executions = write(&self.store.executions);
        self.transition_locked(
            &mut executions,
            execution_id,
            ExecutionStatus::Failed,
            None,
            Some(error_message.to_string()),
        )
    }

    /// Apply a terminal transition while the caller holds the executions lock.
    ///
    /// Rejects with `InvalidState` when the execution is already terminal;
    /// counters are only touched by the call that performs the transition.
    pub(crate) fn transition_locked(
        &self,
        executions: &mut HashMap<String, Execution>,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<String>,
        notes: Option<String>,
    ) -> Result<Execution> {
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Execution, execution_id))?;

        if execution.is_terminal() {
            warn!(
                "Rejected {} transition of execution {}: already {}",
                status, execution_id, execution.status
            );
            return Err(PipelineError::InvalidState(format!(
                "execution {} is already {}",
                execution_id, execution.status
            )));
        }

        execution.status = status;
        execution.end_time = Some(Utc::now());
        if result.is_some() {
            execution.result = result;
        }
        execution.notes = notes;

        let updated = execution.clone();

        if let Some(user) = &updated.user_id {
            match status {
                ExecutionStatus::Completed => self.stats.record_execution_succeeded(user),
                ExecutionStatus::Failed => self.stats.record_execution_failed(user),
                ExecutionStatus::Running => {}
            }
        }

        info!("Execution {} is now {}", execution_id, status);
        Ok(updated)
    }

    pub fn get(&self, execution_id: &str) -> Result<Execution> {
        read(&self.store.executions)
            .get(execution_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Execution, execution_id))
    }

    /// All executions, newest start first.
    pub fn list_all(&self) -> Vec<Execution> {
        self.collect(|_| true)
    }

    /// Executions of an agent, newest start first.
    pub fn list_by_agent(&self, agent_id: &str) -> Vec<Execution> {
        self.collect(|e| e.agent_id == agent_id)
    }

    /// Executions attributed to a user, newest start first.
    pub fn list_by_user(&self, user_id: &str) -> Vec<Execution> {
        self.collect(|e| e.user_id.as_deref() == Some(user_id))
    }

    /// Delete an execution and its fraud reports. Counters are left as they
    /// are; `recompute` brings them back in line.
    pub fn delete(&self, execution_id: &str) -> bool {
        let mut executions = write(&self.store.executions);
        if executions.remove(execution_id).is_none() {
            return false;
        }

        let mut reports = write(&self.store.reports);
        reports.retain(|_, r| r.execution_id != execution_id);

        debug!("Deleted execution {}", execution_id);
        true
    }

    fn collect(&self, matches: impl Fn(&Execution) -> bool) -> Vec<Execution> {
        let mut executions: Vec<Execution> = read(&self.store.executions)
            .values()
            .filter(|e| matches(e))
            .cloned()
            .collect();
        executions.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        executions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, User};

    struct Fixture {
        store: Arc<Store>,
        tracker: ExecutionTracker,
        stats: StatisticsAggregator,
        user: String,
        agent: String,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::new());
        let user = User::new("Owner", "owner@example.com");
        let agent = Agent::new("Audit", "controller", Some(user.id.clone()));
        let (user_id, agent_id) = (user.id.clone(), agent.id.clone());
        write(&store.users).insert(user_id.clone(), user);
        write(&store.agents).insert(agent_id.clone(), agent);

        let stats = StatisticsAggregator::new(store.clone());
        Fixture {
            tracker: ExecutionTracker::new(store.clone(), stats.clone()),
            store,
            stats,
            user: user_id,
            agent: agent_id,
        }
    }

    #[test]
    fn test_start_requires_agent() {
        let f = fixture();
        let err = f.tracker.start("missing", Some(&f.user)).unwrap_err();
        assert!(err.is_not_found());
        assert!(f.tracker.list_all().is_empty());
        assert_eq!(f.stats.statistics(&f.user).unwrap().total_executions, 0);
    }

    #[test]
    fn test_start_counts_immediately() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, Some(&f.user)).unwrap();

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.end_time.is_none());
        assert_eq!(f.stats.statistics(&f.user).unwrap().total_executions, 1);
    }

    #[test]
    fn test_complete_sets_end_time_once() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, Some(&f.user)).unwrap();

        let done = f.tracker.complete(&execution.id, "ok", "notes").unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.end_time.is_some());
        assert_eq!(done.result.as_deref(), Some("ok"));

        let again = f.tracker.complete(&execution.id, "ok", "notes").unwrap_err();
        assert!(again.is_invalid_state());
        let failed = f.tracker.fail(&execution.id, "late").unwrap_err();
        assert!(failed.is_invalid_state());

        let stats = f.stats.statistics(&f.user).unwrap();
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.failed_executions, 0);
        assert_eq!(f.tracker.get(&execution.id).unwrap().end_time, done.end_time);
    }

    #[test]
    fn test_fail_records_message() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, Some(&f.user)).unwrap();

        let failed = f.tracker.fail(&execution.id, "engine unreachable").unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.notes.as_deref(), Some("engine unreachable"));
        assert!(failed.end_time.is_some());
        assert_eq!(f.stats.statistics(&f.user).unwrap().failed_executions, 1);
    }

    #[test]
    fn test_unknown_execution() {
        let f = fixture();
        assert!(f.tracker.complete("nope", "", "").unwrap_err().is_not_found());
        assert!(f.tracker.fail("nope", "").unwrap_err().is_not_found());
        assert!(!f.tracker.delete("nope"));
    }

    #[test]
    fn test_anonymous_execution_leaves_counters() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, None).unwrap();
        f.tracker.complete(&execution.id, "ok", "").unwrap();

        let stats = f.stats.statistics(&f.user).unwrap();
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.successful_executions, 0);
    }

    #[test]
    fn test_racing_transitions_have_one_winner() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, Some(&f.user)).unwrap();

        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let tracker = f.tracker.clone();
                    let id = execution.id.clone();
                    scope.spawn(move || {
                        if i % 2 == 0 {
                            tracker.complete(&id, "ok", "").is_ok()
                        } else {
                            tracker.fail(&id, "boom").is_ok()
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
        let stats = f.stats.statistics(&f.user).unwrap();
        assert_eq!(stats.successful_executions + stats.failed_executions, 1);
    }

    #[test]
    fn test_listing_is_newest_first() {
        let f = fixture();
        let first = f.tracker.start(&f.agent, Some(&f.user)).unwrap();
        let second = f.tracker.start(&f.agent, None).unwrap();

        let by_agent: Vec<String> = f
            .tracker
            .list_by_agent(&f.agent)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(by_agent, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(f.tracker.list_by_user(&f.user).len(), 1);
    }

    #[test]
    fn test_delete_keeps_counters() {
        let f = fixture();
        let execution = f.tracker.start(&f.agent, Some(&f.user)).unwrap();
        assert!(f.tracker.delete(&execution.id));
        assert!(f.tracker.get(&execution.id).unwrap_err().is_not_found());
        assert_eq!(f.stats.statistics(&f.user).unwrap().total_executions, 1);
        assert_eq!(f.stats.recompute(&f.user).unwrap().total_executions, 0);
        assert!(read(&f.store.executions).is_empty());
    }
}

//! Analysis result store.
//!
//! Persists canonical fraud reports. Recording a payload for a running
//! execution also completes that execution; a completed execution accepts
//! further reports without changing status, a failed one accepts none.

use crate::error::{PipelineError, RecordKind, Result};
use crate::models::{ExecutionStatus, FraudReport, RawPayload};
use crate::store::{read, write, Store};
use crate::tracker::ExecutionTracker;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary stored on an execution completed by a submitted payload.
pub const RECORDED_SUMMARY: &str = "Analyse terminée";
/// Notes stored on an execution completed by a submitted payload.
pub const RECORDED_NOTES: &str = "Résultats d'analyse enregistrés";

#[derive(Debug, Clone)]
pub struct ResultStore {
    store: Arc<Store>,
    tracker: ExecutionTracker,
}

impl ResultStore {
    pub fn new(store: Arc<Store>, tracker: ExecutionTracker) -> Self {
        Self { store, tracker }
    }

    /// Normalize and persist a raw payload for an execution.
    ///
    /// Fails with `NotFound` for an unknown execution and `InvalidState`
    /// for a failed one; nothing is persisted in either case.
    pub fn record(&self, execution_id: &str, raw: RawPayload) -> Result<FraudReport> {
        debug!(
            "Recording payload for execution {} (keys: {:?})",
            execution_id,
            raw.keys().collect::<Vec<_>>()
        );

        let mut executions = write(&self.store.executions);
        let execution = executions
            .get(execution_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Execution, execution_id))?;

        if execution.status == ExecutionStatus::Failed {
            return Err(PipelineError::InvalidState(format!(
                "execution {} has failed and accepts no results",
                execution_id
            )));
        }

        let report = FraudReport::new(execution, raw);

        if execution.status == ExecutionStatus::Running {
            self.tracker.transition_locked(
                &mut executions,
                execution_id,
                ExecutionStatus::Completed,
                Some(RECORDED_SUMMARY.to_string()),
                Some(RECORDED_NOTES.to_string()),
            )?;
        }

        write(&self.store.reports).insert(report.id.clone(), report.clone());

        info!(
            "Recorded fraud report {} for execution {} (verdict: {})",
            report.id,
            execution_id,
            report.verdict()
        );
        Ok(report)
    }

    pub fn get(&self, report_id: &str) -> Result<FraudReport> {
        read(&self.store.reports)
            .get(report_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(RecordKind::FraudReport, report_id))
    }

    /// All reports, newest first.
    pub fn list_all(&self) -> Vec<FraudReport> {
        self.collect(|_| true)
    }

    /// Reports of one execution, in submission order.
    pub fn list_by_execution(&self, execution_id: &str) -> Vec<FraudReport> {
        let mut reports = self.collect(|r| r.execution_id == execution_id);
        reports.reverse();
        reports
    }

    /// Reports of an agent, newest first.
    pub fn list_by_agent(&self, agent_id: &str) -> Vec<FraudReport> {
        self.collect(|r| r.agent_id == agent_id)
    }

    /// Reports of a user, newest first.
    pub fn list_by_user(&self, user_id: &str) -> Vec<FraudReport> {
        self.collect(|r| r.user_id.as_deref() == Some(user_id))
    }

    /// Replace a report's raw payload; canonical fields are re-derived.
    pub fn replace_payload(&self, report_id: &str, raw: RawPayload) -> Result<FraudReport> {
        let mut reports = write(&self.store.reports);
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::FraudReport, report_id))?;

        report.replace_payload(raw);
        debug!("Replaced payload of fraud report {}", report_id);
        Ok(report.clone())
    }

    pub fn delete(&self, report_id: &str) -> bool {
        write(&self.store.reports).remove(report_id).is_some()
    }

    pub fn delete_by_execution(&self, execution_id: &str) -> usize {
        self.remove_where(|r| r.execution_id == execution_id)
    }

    pub fn delete_by_agent(&self, agent_id: &str) -> usize {
        self.remove_where(|r| r.agent_id == agent_id)
    }

    pub fn delete_by_user(&self, user_id: &str) -> usize {
        self.remove_where(|r| r.user_id.as_deref() == Some(user_id))
    }

    fn remove_where(&self, matches: impl Fn(&FraudReport) -> bool) -> usize {
        let mut reports = write(&self.store.reports);
        let before = reports.len();
        reports.retain(|_, r| !matches(r));
        before - reports.len()
    }

    fn collect(&self, matches: impl Fn(&FraudReport) -> bool) -> Vec<FraudReport> {
        let mut reports: Vec<FraudReport> = read(&self.store.reports)
            .values()
            .filter(|r| matches(r))
            .cloned()
            .collect();
        reports.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        reports
    }
}

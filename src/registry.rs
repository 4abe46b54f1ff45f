//! Agent registry.
//!
//! Owns agent records and the documents attached to them: any number of
//! invoice files and at most one mission order. Cascading deletion of an
//! agent's executions and reports is orchestrated by
//! [`Pipeline`](crate::pipeline::Pipeline); the registry only removes the
//! agent and its documents.

use crate::analysis::StatisticsAggregator;
use crate::error::{PipelineError, RecordKind, Result};
use crate::models::{new_id, Agent, DocumentKind, MissionDetails, StoredDocument, Upload};
use crate::store::{read, write, Store};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    store: Arc<Store>,
    stats: StatisticsAggregator,
}

impl AgentRegistry {
    pub fn new(store: Arc<Store>, stats: StatisticsAggregator) -> Self {
        Self { store, stats }
    }

    /// Register an agent and bump its owner's agent counter.
    pub fn create(&self, name: &str, role: &str, user_id: Option<&str>) -> Result<Agent> {
        if name.trim().is_empty() {
            return Err(PipelineError::InvalidState(
                "agent name must not be empty".to_string(),
            ));
        }

        let user_id = user_id.filter(|u| !u.is_empty()).map(str::to_string);
        let agent = Agent::new(name.trim(), role.trim(), user_id);
        write(&self.store.agents).insert(agent.id.clone(), agent.clone());

        if let Some(user) = &agent.user_id {
            self.stats.increment_agent_count(user);
        }

        info!("Created agent {} ({})", agent.id, agent.name);
        Ok(agent)
    }

    pub fn get(&self, agent_id: &str) -> Result<Agent> {
        read(&self.store.agents)
            .get(agent_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))
    }

    pub fn exists(&self, agent_id: &str) -> bool {
        read(&self.store.agents).contains_key(agent_id)
    }

    /// All agents, newest first.
    pub fn list_all(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = read(&self.store.agents).values().cloned().collect();
        sort_newest_first(&mut agents);
        agents
    }

    /// Agents owned by `user_id`, newest first.
    pub fn list_by_user(&self, user_id: &str) -> Vec<Agent> {
        let mut agents: Vec<Agent> = read(&self.store.agents)
            .values()
            .filter(|a| a.is_owned_by(user_id))
            .cloned()
            .collect();
        sort_newest_first(&mut agents);
        agents
    }

    /// Rename an agent or change its role. The owner is left untouched.
    pub fn update(&self, agent_id: &str, name: Option<&str>, role: Option<&str>) -> Result<Agent> {
        let agent = {
            let mut agents = write(&self.store.agents);
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

            if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                agent.name = name.to_string();
            }
            if let Some(role) = role {
                agent.role = role.trim().to_string();
            }
            agent.clone()
        };

        if let Some(user) = &agent.user_id {
            if let Err(e) = self.stats.recompute(user) {
                warn!("Statistics not recomputed after agent update: {}", e);
            }
        }

        debug!("Updated agent {}", agent_id);
        Ok(agent)
    }

    /// Attach an invoice file. Empty uploads are ignored and yield `None`.
    pub fn add_invoice(&self, agent_id: &str, upload: Upload) -> Result<Option<StoredDocument>> {
        let mut agents = write(&self.store.agents);
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

        if upload.data.is_empty() {
            debug!("Ignoring empty invoice upload for agent {}", agent_id);
            return Ok(None);
        }

        let file_name = upload
            .file_name
            .clone()
            .unwrap_or_else(|| format!("invoice_{}.pdf", Utc::now().timestamp_millis()));
        let document = stored_document(agent_id, DocumentKind::Invoice, file_name, upload, None);

        agent.invoice_file_ids.insert(document.id.clone());
        write(&self.store.documents).insert(document.id.clone(), document.clone());

        info!(
            "Attached invoice {} ({}) to agent {}",
            document.id, document.file_name, agent_id
        );
        Ok(Some(document))
    }

    /// Invoice files of an agent, oldest upload first.
    pub fn invoices(&self, agent_id: &str) -> Result<Vec<StoredDocument>> {
        let agent = self.get(agent_id)?;
        let documents = read(&self.store.documents);
        let mut invoices: Vec<StoredDocument> = agent
            .invoice_file_ids
            .iter()
            .filter_map(|id| documents.get(id).cloned())
            .collect();
        invoices.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(invoices)
    }

    /// Fetch one document, only if it belongs to `agent_id`.
    pub fn document(&self, agent_id: &str, document_id: &str) -> Result<StoredDocument> {
        read(&self.store.documents)
            .get(document_id)
            .filter(|d| d.agent_id == agent_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Document, document_id))
    }

    /// Detach and delete an invoice file. `false` if the agent did not have it.
    pub fn remove_invoice(&self, agent_id: &str, document_id: &str) -> Result<bool> {
        let mut agents = write(&self.store.agents);
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

        if !agent.invoice_file_ids.remove(document_id) {
            return Ok(false);
        }
        write(&self.store.documents).remove(document_id);

        debug!("Removed invoice {} from agent {}", document_id, agent_id);
        Ok(true)
    }

    /// Attach a mission order, replacing any previous one.
    pub fn set_mission_order(
        &self,
        agent_id: &str,
        upload: Upload,
        details: MissionDetails,
    ) -> Result<Option<StoredDocument>> {
        let mut agents = write(&self.store.agents);
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

        if upload.data.is_empty() {
            debug!("Ignoring empty mission order upload for agent {}", agent_id);
            return Ok(None);
        }

        let file_name = upload
            .file_name
            .clone()
            .unwrap_or_else(|| format!("mission_order_{}.pdf", agent_id));
        let document = stored_document(
            agent_id,
            DocumentKind::MissionOrder,
            file_name,
            upload,
            Some(details),
        );

        let mut documents = write(&self.store.documents);
        if let Some(previous) = agent.mission_order_id.replace(document.id.clone()) {
            documents.remove(&previous);
            debug!("Replaced mission order {} of agent {}", previous, agent_id);
        }
        documents.insert(document.id.clone(), document.clone());

        info!("Attached mission order {} to agent {}", document.id, agent_id);
        Ok(Some(document))
    }

    pub fn mission_order(&self, agent_id: &str) -> Result<Option<StoredDocument>> {
        let agent = self.get(agent_id)?;
        Ok(agent
            .mission_order_id
            .and_then(|id| read(&self.store.documents).get(&id).cloned()))
    }

    /// Detach and delete the mission order. `false` if there was none.
    pub fn remove_mission_order(&self, agent_id: &str) -> Result<bool> {
        let mut agents = write(&self.store.agents);
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Agent, agent_id))?;

        match agent.mission_order_id.take() {
            Some(id) => {
                write(&self.store.documents).remove(&id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn stored_document(
    agent_id: &str,
    kind: DocumentKind,
    file_name: String,
    upload: Upload,
    mission: Option<MissionDetails>,
) -> StoredDocument {
    StoredDocument {
        id: new_id(),
        agent_id: agent_id.to_string(),
        kind,
        file_name,
        content_type: upload
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        data: upload.data,
        uploaded_at: Utc::now(),
        mission,
    }
}

fn sort_newest_first(agents: &mut [Agent]) {
    agents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn registry() -> (AgentRegistry, Arc<Store>, String) {
        let store = Arc::new(Store::new());
        let user = User::new("Owner", "owner@example.com");
        let user_id = user.id.clone();
        write(&store.users).insert(user_id.clone(), user);
        let stats = StatisticsAggregator::new(store.clone());
        (AgentRegistry::new(store.clone(), stats), store, user_id)
    }

    fn upload(name: Option<&str>, data: &[u8]) -> Upload {
        Upload {
            file_name: name.map(str::to_string),
            content_type: None,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_create_counts_agents() {
        let (registry, store, user) = registry();
        registry.create("Audit", "controller", Some(&user)).unwrap();
        registry.create("Orphan", "controller", None).unwrap();

        assert_eq!(read(&store.users)[&user].statistics.total_agents, 1);
        assert_eq!(registry.list_by_user(&user).len(), 1);
        assert_eq!(registry.list_all().len(), 2);
    }

    #[test]
    fn test_create_rejects_blank_name() {
        let (registry, _, user) = registry();
        let err = registry.create("  ", "role", Some(&user)).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_update_keeps_owner() {
        let (registry, _, user) = registry();
        let agent = registry.create("Audit", "controller", Some(&user)).unwrap();

        let updated = registry.update(&agent.id, Some("Renamed"), None).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.role, "controller");
        assert_eq!(updated.user_id.as_deref(), Some(user.as_str()));
        assert!(registry.update("missing", Some("x"), None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_invoices() {
        let (registry, _, user) = registry();
        let agent = registry.create("Audit", "controller", Some(&user)).unwrap();

        let first = registry
            .add_invoice(&agent.id, upload(Some("a.pdf"), b"%PDF-a"))
            .unwrap()
            .unwrap();
        let second = registry
            .add_invoice(&agent.id, upload(None, b"%PDF-b"))
            .unwrap()
            .unwrap();
        assert!(registry.add_invoice(&agent.id, upload(None, b"")).unwrap().is_none());

        assert_eq!(first.content_type, "application/pdf");
        assert!(second.file_name.starts_with("invoice_"));
        assert_eq!(registry.invoices(&agent.id).unwrap().len(), 2);
        assert_eq!(registry.document(&agent.id, &first.id).unwrap().data, b"%PDF-a");
        assert!(registry.document("other", &first.id).unwrap_err().is_not_found());

        assert!(registry.remove_invoice(&agent.id, &first.id).unwrap());
        assert!(!registry.remove_invoice(&agent.id, &first.id).unwrap());
        assert_eq!(registry.invoices(&agent.id).unwrap().len(), 1);
    }

    #[test]
    fn test_mission_order_is_replaced() {
        let (registry, store, user) = registry();
        let agent = registry.create("Audit", "controller", Some(&user)).unwrap();

        let details = MissionDetails {
            mission_name: Some("Salon Casablanca".to_string()),
            ..MissionDetails::default()
        };
        let first = registry
            .set_mission_order(&agent.id, upload(None, b"om-1"), details.clone())
            .unwrap()
            .unwrap();
        assert_eq!(first.file_name, format!("mission_order_{}.pdf", agent.id));

        let second = registry
            .set_mission_order(&agent.id, upload(Some("om.pdf"), b"om-2"), details)
            .unwrap()
            .unwrap();

        let current = registry.mission_order(&agent.id).unwrap().unwrap();
        assert_eq!(current.id, second.id);
        assert!(!read(&store.documents).contains_key(&first.id));

        assert!(registry.remove_mission_order(&agent.id).unwrap());
        assert!(registry.mission_order(&agent.id).unwrap().is_none());
        assert!(!registry.remove_mission_order(&agent.id).unwrap());
    }
}

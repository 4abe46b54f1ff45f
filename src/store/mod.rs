//! In-memory record store with JSON snapshot persistence.
//!
//! Every collection sits behind its own `RwLock`. Code that holds more
//! than one lock at a time acquires them in this order:
//!
//! agents → executions → reports → users → documents
//!
//! The snapshot file is written to a temporary sibling and renamed into
//! place, so a crash mid-save leaves the previous snapshot intact.

use crate::error::Result;
use crate::models::{Agent, Execution, FraudReport, StoredDocument, User};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Serialized form of the whole store.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    agents: Vec<Agent>,
    #[serde(default)]
    executions: Vec<Execution>,
    #[serde(default)]
    reports: Vec<FraudReport>,
    #[serde(default)]
    documents: Vec<StoredDocument>,
}

/// Record counts, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub users: usize,
    pub agents: usize,
    pub executions: usize,
    pub reports: usize,
    pub documents: usize,
}

/// What a cascading removal starts from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Cascade<'a> {
    /// One agent.
    Agent(&'a str),
    /// A user, the agents it owns and everything attributed to it.
    User(&'a str),
}

/// Records taken out by [`Store::cascade`].
#[derive(Debug, Default)]
pub(crate) struct Purged {
    pub agents: Vec<Agent>,
    pub user: Option<User>,
    pub executions: usize,
    pub reports: usize,
    /// Users whose executions were removed.
    pub affected_users: BTreeSet<String>,
}

/// All collections of the pipeline.
#[derive(Debug, Default)]
pub struct Store {
    pub(crate) agents: RwLock<HashMap<String, Agent>>,
    pub(crate) executions: RwLock<HashMap<String, Execution>>,
    pub(crate) reports: RwLock<HashMap<String, FraudReport>>,
    pub(crate) users: RwLock<HashMap<String, User>>,
    pub(crate) documents: RwLock<HashMap<String, StoredDocument>>,
}

/// Shared lock, recovering the data if a writer panicked.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive lock, recovering the data if a writer panicked.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn index<T>(records: Vec<T>, id: impl Fn(&T) -> &str) -> HashMap<String, T> {
    records
        .into_iter()
        .map(|record| (id(&record).to_string(), record))
        .collect()
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let store = Self::from_snapshot(snapshot);

        let counts = store.counts();
        info!(
            "Loaded snapshot {}: {} users, {} agents, {} executions, {} reports",
            path.display(),
            counts.users,
            counts.agents,
            counts.executions,
            counts.reports
        );

        Ok(store)
    }

    /// Write the store to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;

        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            users: read(&self.users).len(),
            agents: read(&self.agents).len(),
            executions: read(&self.executions).len(),
            reports: read(&self.reports).len(),
            documents: read(&self.documents).len(),
        }
    }

    /// Remove agents with their executions, reports and documents in one
    /// critical section.
    ///
    /// The agents write lock is held until every dependent record is gone,
    /// so no execution can be started for a removed agent meanwhile.
    pub(crate) fn cascade(&self, scope: Cascade<'_>) -> Purged {
        let mut agents = write(&self.agents);
        let user_id = match scope {
            Cascade::Agent(_) => None,
            Cascade::User(user_id) => Some(user_id),
        };
        let agent_ids: HashSet<String> = agents
            .values()
            .filter(|a| match scope {
                Cascade::Agent(agent_id) => a.id == agent_id,
                Cascade::User(user_id) => a.is_owned_by(user_id),
            })
            .map(|a| a.id.clone())
            .collect();
        let removed: Vec<Agent> = agent_ids.iter().filter_map(|id| agents.remove(id)).collect();

        let doomed = |agent_id: &str, owner: Option<&str>| {
            agent_ids.contains(agent_id) || (user_id.is_some() && owner == user_id)
        };

        let mut executions = write(&self.executions);
        let mut affected_users = BTreeSet::new();
        let before = executions.len();
        executions.retain(|_, e| {
            if !doomed(&e.agent_id, e.user_id.as_deref()) {
                return true;
            }
            affected_users.extend(e.user_id.clone());
            false
        });
        let executions_removed = before - executions.len();

        let mut reports = write(&self.reports);
        let before = reports.len();
        reports.retain(|_, r| !doomed(&r.agent_id, r.user_id.as_deref()));
        let reports_removed = before - reports.len();

        let user = user_id.and_then(|id| write(&self.users).remove(id));

        write(&self.documents).retain(|_, d| !agent_ids.contains(&d.agent_id));

        debug!(
            "Cascade removed {} agent(s), {} execution(s), {} report(s)",
            removed.len(),
            executions_removed,
            reports_removed
        );
        Purged {
            agents: removed,
            user,
            executions: executions_removed,
            reports: reports_removed,
            affected_users,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let agents = read(&self.agents);
        let executions = read(&self.executions);
        let reports = read(&self.reports);
        let users = read(&self.users);
        let documents = read(&self.documents);

        let mut snapshot = Snapshot {
            users: users.values().cloned().collect(),
            agents: agents.values().cloned().collect(),
            executions: executions.values().cloned().collect(),
            reports: reports.values().cloned().collect(),
            documents: documents.values().cloned().collect(),
        };

        // Stable file content across saves
        snapshot.users.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.agents.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.executions.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.reports.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.documents.sort_by(|a, b| a.id.cmp(&b.id));

        snapshot
    }

    fn from_snapshot(mut snapshot: Snapshot) -> Self {
        // Canonical fields always follow the raw payload
        for report in &mut snapshot.reports {
            if report.renormalize() {
                warn!("Fraud report {} did not match its payload, fields re-derived", report.id);
            }
        }

        Self {
            agents: RwLock::new(index(snapshot.agents, |a| &a.id)),
            executions: RwLock::new(index(snapshot.executions, |e| &e.id)),
            reports: RwLock::new(index(snapshot.reports, |r| &r.id)),
            users: RwLock::new(index(snapshot.users, |u| &u.id)),
            documents: RwLock::new(index(snapshot.documents, |d| &d.id)),
        }
    }
}

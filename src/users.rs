//! User directory.

use crate::error::{PipelineError, RecordKind, Result};
use crate::models::User;
use crate::store::{read, write, Store};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct UserDirectory {
    store: Arc<Store>,
}

impl UserDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register a user. Emails are unique, compared case-insensitively.
    pub fn add(&self, name: &str, email: &str) -> Result<User> {
        let email = email.trim();
        if name.trim().is_empty() || email.is_empty() {
            return Err(PipelineError::InvalidState(
                "user name and email are required".to_string(),
            ));
        }

        let mut users = write(&self.store.users);
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(PipelineError::InvalidState(format!(
                "email already registered: {}",
                email
            )));
        }

        let user = User::new(name.trim(), email);
        users.insert(user.id.clone(), user.clone());

        info!("Registered user {} <{}>", user.id, user.email);
        Ok(user)
    }

    pub fn get(&self, user_id: &str) -> Result<User> {
        read(&self.store.users)
            .get(user_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(RecordKind::User, user_id))
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let email = email.trim();
        read(&self.store.users)
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    /// All users, oldest first.
    pub fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = read(&self.store.users).values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        users
    }

    /// Change a user's name or email. Statistics are not touched.
    pub fn update(&self, user_id: &str, name: Option<&str>, email: Option<&str>) -> Result<User> {
        let mut users = write(&self.store.users);

        if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
            let taken = users
                .values()
                .any(|u| u.id != user_id && u.email.eq_ignore_ascii_case(email));
            if taken {
                return Err(PipelineError::InvalidState(format!(
                    "email already registered: {}",
                    email
                )));
            }
        }

        let user = users
            .get_mut(user_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::User, user_id))?;
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            user.name = name.to_string();
        }
        if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
            user.email = email.to_string();
        }
        user.updated_at = Utc::now();

        debug!("Updated user {}", user_id);
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        UserDirectory::new(Arc::new(Store::new()))
    }

    #[test]
    fn test_add_and_lookup() {
        let users = directory();
        let user = users.add("Amina", "amina@example.com").unwrap();

        assert_eq!(users.get(&user.id).unwrap().name, "Amina");
        assert_eq!(
            users.find_by_email("AMINA@example.com").map(|u| u.id),
            Some(user.id.clone())
        );
        assert_eq!(users.get(&user.id).unwrap().statistics.total_agents, 0);
        assert!(users.get("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_email_is_unique() {
        let users = directory();
        let first = users.add("Amina", "amina@example.com").unwrap();
        let second = users.add("Karim", "karim@example.com").unwrap();

        assert!(users.add("Other", "Amina@Example.com").unwrap_err().is_invalid_state());
        assert!(users
            .update(&second.id, None, Some("amina@example.com"))
            .unwrap_err()
            .is_invalid_state());

        let same = users.update(&first.id, Some("Amina B."), Some("amina@example.com")).unwrap();
        assert_eq!(same.name, "Amina B.");
        assert_eq!(users.list().len(), 2);
    }

    #[test]
    fn test_blank_fields_rejected() {
        let users = directory();
        assert!(users.add("", "x@example.com").unwrap_err().is_invalid_state());
        assert!(users.add("X", "  ").unwrap_err().is_invalid_state());
    }
}

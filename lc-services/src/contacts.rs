//! Contacts service: a user's saved contacts and phone search.

use async_trait::async_trait;
use tracing::{debug, info};

use lc_api::{Query, SharedBackend};
use lc_core::constants::tables;
use lc_core::error::{LcError, LcResult};
use lc_core::phone;
use lc_models::{Contact, User};

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};

/// Service for the contact list.
///
/// Contacts are one-directional: adding someone does not add you to theirs.
/// Name, avatar, and status are copied at the time of adding and are not
/// refreshed when the referenced user changes.
pub struct ContactsService {
    state: StateCell,
    backend: SharedBackend,
    event_bus: EventBus,
    search_limit: u32,
}

impl ContactsService {
    pub fn new(backend: SharedBackend, event_bus: EventBus, search_limit: u32) -> Self {
        Self {
            state: StateCell::new(),
            backend,
            event_bus,
            search_limit,
        }
    }

    /// Contacts saved by `user_id`, by name.
    pub async fn list_contacts(&self, user_id: &str) -> LcResult<Vec<Contact>> {
        let rows = self
            .backend
            .select(
                tables::CONTACTS,
                &Query::new().eq("user_id", user_id).order_by("name", true),
            )
            .await?;
        rows.iter().map(Contact::from_server_map).collect()
    }

    /// Save `contact_id` as a contact of `user_id`.
    pub async fn add_contact(&self, user_id: &str, contact_id: &str) -> LcResult<Contact> {
        let target = self
            .backend
            .select_one(tables::USERS, &Query::new().eq("id", contact_id))
            .await?
            .ok_or_else(|| LcError::UserNotFound(contact_id.to_string()))?;
        let target = User::from_server_map(&target)?;

        let row = self
            .backend
            .insert(tables::CONTACTS, Contact::insert_row(user_id, &target))
            .await?;
        let contact = Contact::from_server_map(&row)?;

        info!(user_id, contact_id, "contact added");
        self.event_bus.emit(AppEvent::ContactAdded {
            user_id: user_id.to_string(),
            contact_id: contact_id.to_string(),
        });
        Ok(contact)
    }

    /// Remove a saved contact. Returns whether one was removed.
    pub async fn remove_contact(&self, user_id: &str, contact_id: &str) -> LcResult<bool> {
        let removed = self
            .backend
            .delete(
                tables::CONTACTS,
                &Query::new().eq("user_id", user_id).eq("contact_id", contact_id),
            )
            .await?;
        if removed > 0 {
            info!(user_id, contact_id, "contact removed");
            self.event_bus.emit(AppEvent::ContactRemoved {
                user_id: user_id.to_string(),
                contact_id: contact_id.to_string(),
            });
        }
        Ok(removed > 0)
    }

    /// Users whose phone contains `partial`, case-insensitively.
    pub async fn search_users_by_phone(&self, partial: &str) -> LcResult<Vec<User>> {
        let fragment = phone::search_fragment(partial);
        if fragment.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .backend
            .select(
                tables::USERS,
                &Query::new()
                    .ilike("phone", format!("%{fragment}%"))
                    .limit(self.search_limit),
            )
            .await?;
        debug!(results = rows.len(), "phone search");
        rows.iter().map(User::from_server_map).collect()
    }
}

#[async_trait]
impl Service for ContactsService {
    fn name(&self) -> &str {
        "contacts"
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    async fn init(&self) -> LcResult<()> {
        self.state.set(ServiceState::Running);
        info!("contacts service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> LcResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lc_api::{Backend, LocalBackend};
    use lc_core::config::DatabaseConfig;
    use lc_models::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded() -> (ContactsService, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("test.db"), &DatabaseConfig::default()).unwrap();
        let backend = Arc::new(LocalBackend::new(db));
        for (id, name, phone) in [
            ("u1", "Ana", "+573001110000"),
            ("u2", "Luis", "+573002220000"),
            ("u3", "Sofía", "+5215512345678"),
        ] {
            backend
                .insert(tables::USERS, json!({"id": id, "name": name, "phone": phone, "status": "hola"}))
                .await
                .unwrap();
        }
        (ContactsService::new(backend, EventBus::new(16), 10), dir)
    }

    #[tokio::test]
    async fn test_add_and_remove_contact() {
        let (svc, _dir) = seeded().await;

        let contact = svc.add_contact("u1", "u2").await.unwrap();
        assert_eq!(contact.name, "Luis");
        assert_eq!(contact.status, "hola");
        assert_eq!(svc.list_contacts("u1").await.unwrap().len(), 1);
        assert!(svc.list_contacts("u2").await.unwrap().is_empty());

        assert!(svc.remove_contact("u1", "u2").await.unwrap());
        assert!(!svc.remove_contact("u1", "u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_unknown_user() {
        let (svc, _dir) = seeded().await;
        let err = svc.add_contact("u1", "nobody").await.unwrap_err();
        assert!(matches!(err, LcError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_search_by_partial_phone() {
        let (svc, _dir) = seeded().await;
        let found = svc.search_users_by_phone("300 2").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u2");

        assert_eq!(svc.search_users_by_phone("+57").await.unwrap().len(), 2);
        assert!(svc.search_users_by_phone("  ").await.unwrap().is_empty());
        assert!(svc.search_users_by_phone("_").await.unwrap().is_empty());
        assert!(svc.search_users_by_phone("%").await.unwrap().is_empty());
    }
}

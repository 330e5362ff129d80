//! Service registry: the application root that wires services together.
//!
//! The registry owns the shared infrastructure (configuration, database,
//! backend, event bus), builds every service from it, initializes them in
//! order, and shuts them down in reverse.

use std::sync::Arc;

use tracing::{error, info, warn};

use lc_api::{SharedBackend, SmsGateway};
use lc_core::config::ConfigHandle;
use lc_core::error::{ErrorCategory, LcError, LcResult};
use lc_models::{Database, LocalStore};

use crate::contacts::ContactsService;
use crate::event_bus::EventBus;
use crate::identity::IdentityService;
use crate::messaging::MessagingService;
use crate::notification::{NotificationService, Notifier};
use crate::service::{Service, ServiceState};

/// Central registry holding every application service.
pub struct ServiceRegistry {
    /// Application configuration.
    pub config: ConfigHandle,
    /// Local database.
    pub database: Database,
    /// Backend shared by all services.
    pub backend: SharedBackend,
    /// Application-level event bus.
    pub event_bus: EventBus,
    pub identity: Arc<IdentityService>,
    pub messaging: Arc<MessagingService>,
    pub contacts: Arc<ContactsService>,
    pub notifications: Arc<NotificationService>,
    /// Services in initialization order.
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    /// Build all services.
    ///
    /// Initialization order:
    /// 1. Notification (config)
    /// 2. Identity (backend, sms, local store)
    /// 3. Contacts (backend)
    /// 4. Messaging (backend)
    pub async fn new(
        config: ConfigHandle,
        database: Database,
        backend: SharedBackend,
        sms: Arc<dyn SmsGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let snapshot = config.read().await.clone();
        let event_bus = EventBus::new(256);

        let notifications = Arc::new(NotificationService::new(notifier, &snapshot.notifications));
        let identity = Arc::new(IdentityService::new(
            backend.clone(),
            sms,
            LocalStore::new(database.clone()),
            event_bus.clone(),
            snapshot.verification.code_ttl_secs,
        ));
        let contacts = Arc::new(ContactsService::new(
            backend.clone(),
            event_bus.clone(),
            snapshot.contacts.search_limit,
        ));
        let messaging = Arc::new(MessagingService::new(
            backend.clone(),
            event_bus.clone(),
            snapshot.messaging.status_policy,
        ));

        let services: Vec<Arc<dyn Service>> = vec![
            notifications.clone(),
            identity.clone(),
            contacts.clone(),
            messaging.clone(),
        ];
        for service in &services {
            info!("registered service: {}", service.name());
        }

        Self {
            config,
            database,
            backend,
            event_bus,
            identity,
            messaging,
            contacts,
            notifications,
            services,
        }
    }

    /// Initialize all services in order.
    ///
    /// A refused OS permission does not stop the remaining services; the
    /// first such error is returned once every service has been started.
    /// Any other failure stops initialization and is returned unchanged.
    pub async fn init_all(&self) -> LcResult<()> {
        info!("initializing {} services on {} backend", self.services.len(), self.backend.name());

        let mut refused: Option<LcError> = None;
        for service in &self.services {
            let name = service.name();
            if let Err(e) = service.init().await {
                if e.category() == ErrorCategory::Permission {
                    warn!("service {name} started without permission: {e}");
                    refused.get_or_insert(e);
                    continue;
                }
                error!("failed to initialize service {name}: {e}");
                return Err(e);
            }
        }

        match refused {
            Some(e) => Err(e),
            None => {
                info!("all services initialized");
                Ok(())
            }
        }
    }

    /// Shut down all services in reverse order.
    pub async fn shutdown_all(&self) -> LcResult<()> {
        info!("shutting down services");

        for service in self.services.iter().rev() {
            if let Err(e) = service.shutdown().await {
                error!("error shutting down service {}: {e}", service.name());
            }
        }

        info!("all services shut down");
        Ok(())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Name, state, and health of every service.
    pub fn health_check(&self) -> Vec<(String, ServiceState, bool)> {
        self.services
            .iter()
            .map(|s| (s.name().to_string(), s.state(), s.is_healthy()))
            .collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

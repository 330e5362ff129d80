//! Service trait and lifecycle state.
//!
//! Every service is shared behind an `Arc` by the registry and the
//! application, so lifecycle methods take `&self` and the state lives in a
//! small interior-mutable cell.

use std::sync::Mutex;

use async_trait::async_trait;

use lc_core::error::LcResult;

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Built by the registry, `init` not yet called.
    Created,
    Initializing,
    /// Ready to serve calls.
    Running,
    ShuttingDown,
    Stopped,
    /// `init` returned an error.
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Initializing => "initializing",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe holder for a service's lifecycle state.
#[derive(Debug)]
pub struct StateCell(Mutex<ServiceState>);

impl StateCell {
    pub fn new() -> Self {
        Self(Mutex::new(ServiceState::Created))
    }

    pub fn get(&self) -> ServiceState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, state: ServiceState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A long-lived application service owned by the `ServiceRegistry`.
///
/// The registry calls `init` in registration order and `shutdown` in
/// reverse.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name used in logs and health output.
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    /// Bring the service up. Called once at start-up.
    async fn init(&self) -> LcResult<()>;

    /// Release channels and other resources.
    async fn shutdown(&self) -> LcResult<()>;

    /// True while the service is `Running`.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestService {
        state: StateCell,
    }

    #[async_trait]
    impl Service for TestService {
        fn name(&self) -> &str {
            "test"
        }
        fn state(&self) -> ServiceState {
            self.state.get()
        }
        async fn init(&self) -> LcResult<()> {
            self.state.set(ServiceState::Running);
            Ok(())
        }
        async fn shutdown(&self) -> LcResult<()> {
            self.state.set(ServiceState::Stopped);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_service_lifecycle() {
        let svc = TestService { state: StateCell::new() };
        assert!(!svc.is_healthy());
        svc.init().await.unwrap();
        assert!(svc.is_healthy());
        svc.shutdown().await.unwrap();
        assert!(!svc.is_healthy());
        assert_eq!(svc.state().to_string(), "stopped");
    }
}

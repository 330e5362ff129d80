//! Identity service: phone verification, registration, and sign-in.
//!
//! State moves `SignedOut -> CodeRequested -> SignedIn`. The current user is
//! held in memory and mirrored to the local store under `user_data`; the
//! pending verification lives under `verification_code` so a code request
//! survives a restart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use lc_api::{Query, SharedBackend, SmsGateway};
use lc_core::constants::{store_keys, tables};
use lc_core::error::{LcError, LcResult, VerificationFailure};
use lc_core::phone;
use lc_models::{LocalStore, PendingVerification, ProfileUpdate, User};

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};

/// Where the user is in the sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    SignedOut,
    CodeRequested,
    SignedIn,
}

impl std::fmt::Display for IdentityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignedOut => write!(f, "signed_out"),
            Self::CodeRequested => write!(f, "code_requested"),
            Self::SignedIn => write!(f, "signed_in"),
        }
    }
}

pub struct IdentityService {
    state: StateCell,
    backend: SharedBackend,
    sms: Arc<dyn SmsGateway>,
    store: LocalStore,
    event_bus: EventBus,
    code_ttl: Duration,
    current: RwLock<Option<User>>,
}

impl IdentityService {
    pub fn new(
        backend: SharedBackend,
        sms: Arc<dyn SmsGateway>,
        store: LocalStore,
        event_bus: EventBus,
        code_ttl_secs: u64,
    ) -> Self {
        Self {
            state: StateCell::new(),
            backend,
            sms,
            store,
            event_bus,
            code_ttl: Duration::seconds(code_ttl_secs.min(u64::from(u32::MAX)) as i64),
            current: RwLock::new(None),
        }
    }

    /// Restore the current user.
    ///
    /// A live backend session wins: its `users` row becomes the current user.
    /// Without one, the last persisted user record is used as-is.
    pub async fn initialize(&self) -> LcResult<Option<User>> {
        if let Some(session) = self.backend.get_session().await? {
            if !session.is_expired() {
                match self.fetch_user(&session.user_id).await? {
                    Some(user) => {
                        self.set_current(user.clone()).await?;
                        info!(user_id = %user.id, "restored user from backend session");
                        return Ok(Some(user));
                    }
                    None => warn!(user_id = %session.user_id, "session has no user profile"),
                }
            }
        }

        let stored: Option<User> = self.store.get(store_keys::USER_DATA)?;
        if let Some(user) = &stored {
            debug!(user_id = %user.id, "restored user from local store");
            self.event_bus.emit(AppEvent::SignedIn {
                user_id: user.id.clone(),
            });
        }
        *self.current.write().await = stored.clone();
        Ok(stored)
    }

    /// Send a verification code to `phone` and remember it as pending.
    ///
    /// Replaces any earlier pending code. Returns the normalized number.
    pub async fn start_phone_verification(&self, raw_phone: &str) -> LcResult<String> {
        let phone = phone::normalize(raw_phone)?;
        let code = self.sms.send_verification_code(&phone).await?;
        self.store
            .set(store_keys::VERIFICATION_CODE, &PendingVerification::new(code, phone.clone()))?;

        info!(phone = %phone::redact(&phone), gateway = self.sms.name(), "verification started");
        self.event_bus.emit(AppEvent::VerificationRequested { phone: phone.clone() });
        Ok(phone)
    }

    /// The pending verification, if a code was requested.
    pub fn pending_verification(&self) -> LcResult<Option<PendingVerification>> {
        self.store.get(store_keys::VERIFICATION_CODE)
    }

    /// Confirm the pending code and create the account.
    ///
    /// On any verification failure the pending record is left untouched so
    /// the user can try again. The code becomes the initial password.
    pub async fn verify_phone_and_register(&self, code: &str, profile: ProfileUpdate) -> LcResult<User> {
        let pending = self
            .pending_verification()?
            .ok_or(LcError::Verification(VerificationFailure::Missing))?;
        pending.check(code, Utc::now(), self.code_ttl)?;

        let auth = self.backend.sign_up(&pending.phone, code.trim()).await?;
        let user = profile.into_user(auth.id, pending.phone.clone());
        let row = self.backend.insert(tables::USERS, user.to_insert_row()).await?;
        let user = User::from_server_map(&row)?;

        self.set_current(user.clone()).await?;
        self.store.remove(store_keys::VERIFICATION_CODE)?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Sign in with phone and password.
    pub async fn login(&self, raw_phone: &str, password: &str) -> LcResult<User> {
        let phone = phone::normalize(raw_phone)?;
        let session = self.backend.sign_in_with_password(&phone, password).await?;
        let user = self
            .fetch_user(&session.user_id)
            .await?
            .ok_or_else(|| LcError::UserNotFound(session.user_id.clone()))?;

        self.set_current(user.clone()).await?;
        info!(user_id = %user.id, "user signed in");
        Ok(user)
    }

    /// Sign out and forget the current user.
    pub async fn logout(&self) -> LcResult<()> {
        self.backend.sign_out().await?;
        self.store.remove(store_keys::USER_DATA)?;
        let previous = self.current.write().await.take();

        if let Some(user) = previous {
            info!(user_id = %user.id, "user signed out");
        }
        self.event_bus.emit(AppEvent::SignedOut);
        Ok(())
    }

    /// Change profile fields of the signed-in user.
    pub async fn update_profile(&self, update: ProfileUpdate) -> LcResult<User> {
        let current = self.current_user().await.ok_or(LcError::NotSignedIn)?;
        if update.is_empty() {
            return Ok(current);
        }

        let rows = self
            .backend
            .update(tables::USERS, &Query::new().eq("id", &current.id), update.to_patch())
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| LcError::UserNotFound(current.id.clone()))?;
        let user = User::from_server_map(row)?;

        self.store.set(store_keys::USER_DATA, &user)?;
        *self.current.write().await = Some(user.clone());
        self.event_bus.emit(AppEvent::ProfileUpdated {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    pub async fn current_user(&self) -> Option<User> {
        self.current.read().await.clone()
    }

    /// The signed-in user, or `NotSignedIn`.
    pub async fn require_user(&self) -> LcResult<User> {
        self.current_user().await.ok_or(LcError::NotSignedIn)
    }

    pub async fn identity_state(&self) -> LcResult<IdentityState> {
        if self.current.read().await.is_some() {
            return Ok(IdentityState::SignedIn);
        }
        if self.pending_verification()?.is_some() {
            return Ok(IdentityState::CodeRequested);
        }
        Ok(IdentityState::SignedOut)
    }

    async fn fetch_user(&self, user_id: &str) -> LcResult<Option<User>> {
        self.backend
            .select_one(tables::USERS, &Query::new().eq("id", user_id))
            .await?
            .map(|row| User::from_server_map(&row))
            .transpose()
    }

    async fn set_current(&self, user: User) -> LcResult<()> {
        self.store.set(store_keys::USER_DATA, &user)?;
        let user_id = user.id.clone();
        *self.current.write().await = Some(user);
        self.event_bus.emit(AppEvent::SignedIn { user_id });
        Ok(())
    }
}

#[async_trait]
impl Service for IdentityService {
    fn name(&self) -> &str {
        "identity"
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    async fn init(&self) -> LcResult<()> {
        self.state.set(ServiceState::Initializing);
        if let Err(e) = self.initialize().await {
            self.state.set(ServiceState::Failed);
            return Err(e);
        }
        self.state.set(ServiceState::Running);
        info!("identity service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> LcResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

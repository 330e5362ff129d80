//! Integration tests for verification, registration, and session restore.

mod common;

use chrono::{Duration, Utc};

use lc_api::Backend;
use lc_core::config::AppConfig;
use lc_core::constants::store_keys;
use lc_core::error::{LcError, VerificationFailure};
use lc_models::{LocalStore, PendingVerification, ProfileUpdate};
use lc_services::{AppEvent, IdentityState};

use common::*;

#[tokio::test]
async fn test_correct_code_after_ttl_is_expired() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;
    let identity = &registry.identity;

    identity.start_phone_verification("+573001234567").await.unwrap();
    let mut pending = identity.pending_verification().unwrap().unwrap();
    pending.issued_at = Utc::now() - Duration::minutes(15) - Duration::seconds(1);
    LocalStore::new(registry.database.clone())
        .set(store_keys::VERIFICATION_CODE, &pending)
        .unwrap();

    let err = identity
        .verify_phone_and_register(&pending.code, ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LcError::Verification(VerificationFailure::Expired)));
    assert_eq!(err.category(), lc_core::ErrorCategory::Verification);

    // the pending record survives so a new code can be requested or retried
    assert_eq!(identity.identity_state().await.unwrap(), IdentityState::CodeRequested);
}

#[tokio::test]
async fn test_configured_ttl_is_honoured() {
    let mut config = AppConfig::default();
    config.verification.code_ttl_secs = 60;
    let (registry, _notifier, _dir) = create_test_registry(config).await;

    registry.identity.start_phone_verification("+5215512345678").await.unwrap();
    let mut pending: PendingVerification = registry.identity.pending_verification().unwrap().unwrap();
    pending.issued_at = Utc::now() - Duration::minutes(2);
    LocalStore::new(registry.database.clone())
        .set(store_keys::VERIFICATION_CODE, &pending)
        .unwrap();

    let err = registry
        .identity
        .verify_phone_and_register(&pending.code, ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LcError::Verification(VerificationFailure::Expired)));
}

#[tokio::test]
async fn test_new_request_replaces_pending_code() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;

    registry.identity.start_phone_verification("+573001234567").await.unwrap();
    registry.identity.start_phone_verification("+573009998877").await.unwrap();

    let pending = registry.identity.pending_verification().unwrap().unwrap();
    assert_eq!(pending.phone, "+573009998877");
}

#[tokio::test]
async fn test_register_emits_signed_in_and_restores_after_restart() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;
    let mut events = registry.event_bus().subscribe();
    registry.init_all().await.unwrap();

    registry.identity.start_phone_verification("+573001234567").await.unwrap();
    let code = registry.identity.pending_verification().unwrap().unwrap().code;
    let user = registry
        .identity
        .verify_phone_and_register(
            &code,
            ProfileUpdate {
                name: Some("Camila".into()),
                region: Some("CO".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut saw_signed_in = false;
    while let Ok(event) = events.try_recv() {
        if event == (AppEvent::SignedIn { user_id: user.id.clone() }) {
            saw_signed_in = true;
        }
    }
    assert!(saw_signed_in);

    // a second identity service on the same database restores the session
    let restored = lc_services::IdentityService::new(
        registry.backend.clone(),
        std::sync::Arc::new(lc_api::ConsoleGateway),
        LocalStore::new(registry.database.clone()),
        create_test_event_bus(),
        900,
    );
    let again = restored.initialize().await.unwrap().unwrap();
    assert_eq!(again.id, user.id);
    assert_eq!(again.region, "CO");
}

#[tokio::test]
async fn test_stored_user_is_used_without_session() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;

    registry.identity.start_phone_verification("+573001234567").await.unwrap();
    let code = registry.identity.pending_verification().unwrap().unwrap().code;
    let user = registry
        .identity
        .verify_phone_and_register(&code, ProfileUpdate::default())
        .await
        .unwrap();

    // drop the backend session but keep the persisted user record
    registry.backend.sign_out().await.unwrap();
    let restored = registry.identity.initialize().await.unwrap().unwrap();
    assert_eq!(restored.id, user.id);

    registry.identity.logout().await.unwrap();
    assert!(registry.identity.initialize().await.unwrap().is_none());
    assert_eq!(registry.identity.identity_state().await.unwrap(), IdentityState::SignedOut);
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;

    registry.identity.start_phone_verification("+573001234567").await.unwrap();
    let code = registry.identity.pending_verification().unwrap().unwrap().code;
    registry
        .identity
        .verify_phone_and_register(&code, ProfileUpdate::default())
        .await
        .unwrap();
    registry.identity.logout().await.unwrap();

    let err = registry.identity.login("+573001234567", "nope").await.unwrap_err();
    assert!(matches!(err, LcError::AuthFailed(_)));
    assert!(registry.identity.current_user().await.is_none());
}

#[tokio::test]
async fn test_update_profile() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;

    registry.identity.start_phone_verification("+573001234567").await.unwrap();
    let code = registry.identity.pending_verification().unwrap().unwrap().code;
    registry
        .identity
        .verify_phone_and_register(&code, ProfileUpdate::default())
        .await
        .unwrap();

    let updated = registry
        .identity
        .update_profile(ProfileUpdate {
            status: Some("En el trabajo".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.status, "En el trabajo");
    assert_eq!(registry.identity.current_user().await.unwrap().status, "En el trabajo");
}

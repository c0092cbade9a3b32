/// Integration tests for the login flow
///
/// Covers credential checks, lockout and the audit trail, all on in-memory
/// backends.
mod common;

use auth_service::audit::{AuditEventType, AuditSeverity};
use auth_service::ledger::RefreshTokenLedger;
use auth_service::models::{LoginRequest, TokenPair, UserStatus};
use auth_service::AuthError;
use common::Harness;
use crypto_core::hash::sha256_hex;
use crypto_core::Clock;
use std::sync::Arc;

#[tokio::test]
async fn test_login_issues_scoped_pair_in_new_family() {
    let h = Harness::new();
    h.add_user("alice", "correct horse", &["USER"]);

    let pair = h.service.login("alice", "correct horse").await.unwrap();
    assert_eq!(pair.token_type, TokenPair::TOKEN_TYPE);
    assert_eq!(pair.expires_at, h.clock.now() + chrono::Duration::seconds(900));

    let principal = h.service.validate_access_token(&pair.access_token).await.unwrap();
    assert_eq!(principal.subject, "alice");
    assert_eq!(principal.roles, vec!["USER".to_string()]);
    assert_eq!(principal.scopes, vec!["profile:read".to_string()]);

    let sessions = h.service.list_sessions("alice").await.unwrap();
    assert_eq!(sessions.len(), 1);

    let family = h.ledger.list_family(sessions[0].family_id).await.unwrap();
    assert_eq!(family.len(), 1);
    assert!(family[0].is_root());
    assert!(!family[0].revoked);
    assert_eq!(family[0].jti_hash, sessions[0].jti_hash);

    assert_eq!(h.audit.count(AuditEventType::LoginSuccess), 1);
}

#[tokio::test]
async fn test_login_accepts_email_case_insensitively() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);

    let pair = h.service.login("  ALICE@example.com ", "pw").await.unwrap();
    let principal = h.service.validate_access_token(&pair.access_token).await.unwrap();
    assert_eq!(principal.subject, "alice");
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_look_the_same() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);

    let wrong = h.service.login("alice", "nope").await.unwrap_err();
    let unknown = h.service.login("mallory", "nope").await.unwrap_err();

    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert_eq!(wrong.public_message(), unknown.public_message());
    // Unknown users still pay for one verification.
    assert_eq!(h.hasher.verifications(), 2);

    let failures: Vec<_> = h
        .audit
        .events()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::LoginFailure)
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|e| e.severity == AuditSeverity::Warning));
}

#[tokio::test]
async fn test_disabled_user_cannot_log_in() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);
    h.users.set_status("alice", UserStatus::Disabled);

    let err = h.service.login("alice", "pw").await.unwrap_err();
    assert!(matches!(err, AuthError::AccountDisabled));
    assert_eq!(err.public_message(), "invalid credentials");
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn test_lockout_rejects_before_password_check() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);

    for _ in 0..6 {
        let err = h.service.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
    assert_eq!(h.hasher.verifications(), 6);

    let err = h.service.login("alice", "pw").await.unwrap_err();
    match err {
        AuthError::AccountLocked { retry_after_secs } => assert!(retry_after_secs > 0),
        other => panic!("expected lockout, got {other:?}"),
    }
    assert_eq!(h.hasher.verifications(), 6);
}

#[tokio::test]
async fn test_lockout_lapses_and_success_resets_counter() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);

    for _ in 0..7 {
        let _ = h.service.login("alice", "wrong").await;
    }
    h.clock.advance(chrono::Duration::seconds(300));

    // The lapsed lock leaves a fresh allowance; success clears it entirely.
    h.service.login("alice", "pw").await.unwrap();

    for _ in 0..6 {
        let err = h.service.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}

#[tokio::test]
async fn test_client_ip_scopes_the_attempt_counter() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);

    for _ in 0..7 {
        let _ = h
            .service
            .login_with(LoginRequest::new("alice", "wrong").with_client_ip("10.0.0.1"))
            .await;
    }

    let blocked = h
        .service
        .login_with(LoginRequest::new("alice", "pw").with_client_ip("10.0.0.1"))
        .await;
    assert!(matches!(blocked, Err(AuthError::AccountLocked { .. })));

    let other_ip = h
        .service
        .login_with(LoginRequest::new("alice", "pw").with_client_ip("10.0.0.2"))
        .await;
    assert!(other_ip.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_failures_are_all_counted() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);
    let service = h.service.clone();

    let mut handles = Vec::new();
    for _ in 0..24 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.login("alice", "wrong").await }));
    }

    let mut invalid = 0;
    let mut locked = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Err(AuthError::InvalidCredentials) => invalid += 1,
            Err(AuthError::AccountLocked { .. }) => locked += 1,
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert_eq!(invalid, 6);
    assert_eq!(locked, 18);
    assert_eq!(h.hasher.verifications(), 6);
}

#[tokio::test]
async fn test_refresh_jti_is_stored_hashed() {
    let h = Harness::new();
    h.add_user("alice", "pw", &["USER"]);
    let pair = h.service.login("alice", "pw").await.unwrap();

    let codec = &h.service.components().codec;
    let claims = codec
        .verify_as(&pair.refresh_token, crypto_core::TokenUse::Refresh)
        .await
        .unwrap();

    let sessions = h.service.list_sessions("alice").await.unwrap();
    assert_eq!(sessions[0].jti_hash, sha256_hex(&claims.jti));
    assert_ne!(sessions[0].jti_hash, claims.jti);
}

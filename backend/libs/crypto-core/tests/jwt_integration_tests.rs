/// Integration tests for crypto-core token codec
///
/// This test module covers:
/// - Wire format of issued tokens
/// - Key rotation across a token's lifetime
/// - Concurrent issuance and verification
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use crypto_core::{Clock, CodecConfig, JwtError, ManualClock, TokenCodec, TokenUse};
use std::collections::HashSet;
use std::sync::Arc;

// Test RSA key pairs - FOR TESTING ONLY
// NEVER use these keys in production
const PRIMARY_PRIVATE: &str = include_str!("fixtures/primary_private.pem");
const PRIMARY_PUBLIC: &str = include_str!("fixtures/primary_public.pem");
const SECONDARY_PRIVATE: &str = include_str!("fixtures/secondary_private.pem");
const SECONDARY_PUBLIC: &str = include_str!("fixtures/secondary_public.pem");

fn build_codec() -> (Arc<TokenCodec>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let codec = TokenCodec::new(
        CodecConfig::new("nova-auth", "nova-api", "nova-auth-refresh"),
        "primary",
        PRIMARY_PRIVATE,
        PRIMARY_PUBLIC,
        clock.clone(),
    )
    .expect("Failed to build codec");
    (Arc::new(codec), clock)
}

fn payload_json(token: &str) -> serde_json::Value {
    let payload = token.split('.').nth(1).expect("payload segment");
    let bytes = URL_SAFE_NO_PAD.decode(payload).expect("base64url payload");
    serde_json::from_slice(&bytes).expect("json payload")
}

#[tokio::test]
async fn test_access_token_wire_format() {
    let (codec, clock) = build_codec();
    let issued = codec
        .issue_access_token(
            "alice",
            &["ADMIN".to_string()],
            &["users:read".to_string(), "users:write".to_string()],
            Duration::minutes(15),
        )
        .await
        .unwrap();

    let payload = payload_json(&issued.token);
    assert_eq!(payload["sub"], "alice");
    assert_eq!(payload["token_use"], "access");
    assert_eq!(payload["iss"], "nova-auth");
    assert_eq!(payload["aud"], "nova-api");
    assert_eq!(payload["iat"], clock.now().timestamp());
    assert_eq!(payload["exp"], clock.now().timestamp() + 900);
    assert_eq!(payload["roles"], serde_json::json!(["ADMIN"]));
    assert_eq!(payload["scopes"], serde_json::json!(["users:read", "users:write"]));
    assert_eq!(payload["jti"], issued.jti.as_str());
    assert!(uuid::Uuid::parse_str(&issued.jti).is_ok());
}

#[tokio::test]
async fn test_refresh_token_carries_no_authorization_data() {
    let (codec, _) = build_codec();
    let issued = codec.issue_refresh_token("alice", Duration::days(30)).await.unwrap();

    let payload = payload_json(&issued.token);
    assert_eq!(payload["token_use"], "refresh");
    assert_eq!(payload["aud"], "nova-auth-refresh");
    assert!(payload.get("roles").is_none());
    assert!(payload.get("scopes").is_none());
}

#[tokio::test]
async fn test_refresh_token_outlives_rotation_until_retired() {
    let (codec, clock) = build_codec();
    let refresh = codec.issue_refresh_token("alice", Duration::days(30)).await.unwrap();

    // Rotate halfway through the refresh token's lifetime.
    clock.advance(Duration::days(15));
    codec
        .rotate_signing_key("secondary", SECONDARY_PRIVATE, SECONDARY_PUBLIC)
        .await
        .unwrap();

    let claims = codec.verify_as(&refresh.token, TokenUse::Refresh).await.unwrap();
    assert_eq!(claims.jti, refresh.jti);

    let rotated = codec.issue_refresh_token("alice", Duration::days(30)).await.unwrap();
    codec.retire_key("primary").await.unwrap();

    assert_eq!(
        codec.verify(&refresh.token).await,
        Err(JwtError::InvalidSignature)
    );
    assert!(codec.verify(&rotated.token).await.is_ok());
    assert_eq!(codec.trusted_kids().await, vec!["secondary"]);
}

#[tokio::test]
async fn test_expiry_is_exact_to_the_second() {
    let (codec, clock) = build_codec();
    let issued = codec
        .issue_access_token("alice", &[], &[], Duration::seconds(900))
        .await
        .unwrap();

    clock.set(issued.expires_at - Duration::seconds(1));
    assert!(codec.verify(&issued.token).await.is_ok());

    clock.set(issued.issued_at + Duration::seconds(901));
    assert_eq!(codec.verify(&issued.token).await, Err(JwtError::Expired));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_yields_unique_jtis() {
    let (codec, _) = build_codec();

    let mut handles = Vec::new();
    for i in 0..32 {
        let codec = codec.clone();
        handles.push(tokio::spawn(async move {
            let subject = format!("user-{}", i % 4);
            let issued = codec
                .issue_refresh_token(&subject, Duration::days(1))
                .await
                .unwrap();
            let claims = codec.verify_as(&issued.token, TokenUse::Refresh).await.unwrap();
            assert_eq!(claims.sub, subject);
            issued.jti
        }));
    }

    let mut jtis = HashSet::new();
    for handle in handles {
        assert!(jtis.insert(handle.await.unwrap()));
    }
    assert_eq!(jtis.len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_verification_during_rotation() {
    let (codec, _) = build_codec();
    let token = codec
        .issue_access_token("alice", &[], &[], Duration::minutes(5))
        .await
        .unwrap()
        .token;

    let verifier = {
        let codec = codec.clone();
        let token = token.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                codec.verify(&token).await.unwrap();
            }
        })
    };

    codec
        .rotate_signing_key("secondary", SECONDARY_PRIVATE, SECONDARY_PUBLIC)
        .await
        .unwrap();
    verifier.await.unwrap();

    assert!(codec.verify(&token).await.is_ok());
}

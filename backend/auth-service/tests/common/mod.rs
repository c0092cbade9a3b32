//! Shared harness: the whole auth core on in-memory backends with a
//! manually driven clock.
#![allow(dead_code)]

use auth_service::attempts::{InMemoryAttemptStore, LockoutPolicy, LoginAttemptGuard};
use auth_service::audit::{AuditEvent, AuditEventType, AuditSink};
use auth_service::blacklist::{
    BlacklistFailurePolicy, InMemoryRevocationStore, RevocationStore, TokenBlacklist,
};
use async_trait::async_trait;
use auth_service::ledger::{InMemoryRefreshTokenLedger, RefreshTokenLedger};
use auth_service::models::{NewRefreshToken, RefreshTokenRecord, UserCredentials, UserStatus};
use auth_service::security::{PasswordHasher, RoleScopeMap, ScopeResolver};
use auth_service::sessions::InMemorySessionRegistry;
use auth_service::users::InMemoryUserStore;
use auth_service::{AuthComponents, AuthError, AuthService, TokenLifetimes};
use chrono::{DateTime, Utc};
use crypto_core::{CodecConfig, ManualClock, TokenCodec};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PRIMARY_PRIVATE: &str = include_str!("../fixtures/primary_private.pem");
pub const PRIMARY_PUBLIC: &str = include_str!("../fixtures/primary_public.pem");

/// Stores passwords as `plain:<raw>` and counts verifications.
#[derive(Default)]
pub struct PlaintextHasher {
    verifications: AtomicUsize,
}

impl PlaintextHasher {
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl PasswordHasher for PlaintextHasher {
    fn hash(&self, raw: &str) -> auth_service::Result<String> {
        Ok(format!("plain:{raw}"))
    }

    fn matches(&self, raw: &str, hash: &str) -> bool {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        hash.strip_prefix("plain:") == Some(raw)
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn publish(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Delegates to the in-memory ledger; family and user revocation can be
/// switched to fail as if the database were down.
pub struct SwitchableLedger {
    inner: Arc<InMemoryRefreshTokenLedger>,
    revocations_down: AtomicBool,
}

impl SwitchableLedger {
    pub fn new(inner: Arc<InMemoryRefreshTokenLedger>) -> Self {
        Self {
            inner,
            revocations_down: AtomicBool::new(false),
        }
    }

    pub fn fail_revocations(&self, down: bool) {
        self.revocations_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> auth_service::Result<()> {
        if self.revocations_down.load(Ordering::SeqCst) {
            return Err(AuthError::StorageTimeout);
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenLedger for SwitchableLedger {
    async fn store(&self, token: NewRefreshToken) -> auth_service::Result<()> {
        self.inner.store(token).await
    }

    async fn find_by_jti(&self, jti: &str) -> auth_service::Result<Option<RefreshTokenRecord>> {
        self.inner.find_by_jti(jti).await
    }

    async fn consume_once(&self, jti: &str) -> auth_service::Result<bool> {
        self.inner.consume_once(jti).await
    }

    async fn rotate(&self, consumed_jti: &str, successor: NewRefreshToken) -> auth_service::Result<bool> {
        self.inner.rotate(consumed_jti, successor).await
    }

    async fn revoke_family(&self, family_id: Uuid) -> auth_service::Result<u64> {
        self.check()?;
        self.inner.revoke_family(family_id).await
    }

    async fn revoke_all_for_user(&self, username: &str) -> auth_service::Result<u64> {
        self.check()?;
        self.inner.revoke_all_for_user(username).await
    }

    async fn delete_expired_before(&self, instant: DateTime<Utc>) -> auth_service::Result<u64> {
        self.inner.delete_expired_before(instant).await
    }

    async fn list_family(&self, family_id: Uuid) -> auth_service::Result<Vec<RefreshTokenRecord>> {
        self.inner.list_family(family_id).await
    }
}

pub struct HarnessOptions {
    pub lockout: LockoutPolicy,
    pub revocations: Option<Arc<dyn RevocationStore>>,
    pub blacklist_policy: BlacklistFailurePolicy,
    pub lifetimes: TokenLifetimes,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy {
                max_attempts: 6,
                window: Duration::from_secs(900),
                lockout: Duration::from_secs(300),
                max_lockout: Duration::from_secs(3600),
            },
            revocations: None,
            blacklist_policy: BlacklistFailurePolicy::FailOpen,
            lifetimes: TokenLifetimes::default(),
        }
    }
}

pub struct Harness {
    pub service: Arc<AuthService>,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<InMemoryRefreshTokenLedger>,
    pub ledger_switch: Arc<SwitchableLedger>,
    pub users: Arc<InMemoryUserStore>,
    pub sessions: Arc<InMemorySessionRegistry>,
    pub hasher: Arc<PlaintextHasher>,
    pub audit: Arc<RecordingAuditSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = TokenCodec::new(
            CodecConfig::new("nova-auth", "nova-api", "nova-auth-refresh"),
            "primary",
            PRIMARY_PRIVATE,
            PRIMARY_PUBLIC,
            clock.clone(),
        )
        .expect("codec");

        let ledger = Arc::new(InMemoryRefreshTokenLedger::new());
        let ledger_switch = Arc::new(SwitchableLedger::new(ledger.clone()));
        let users = Arc::new(InMemoryUserStore::new());
        let sessions = Arc::new(InMemorySessionRegistry::new(clock.clone()));
        let hasher = Arc::new(PlaintextHasher::default());
        let audit = Arc::new(RecordingAuditSink::default());
        let revocations: Arc<dyn RevocationStore> = match options.revocations {
            Some(store) => store,
            None => Arc::new(InMemoryRevocationStore::new(clock.clone())),
        };
        let timeout = Duration::from_secs(1);

        let components = AuthComponents {
            codec: Arc::new(codec),
            ledger: ledger_switch.clone(),
            blacklist: Arc::new(TokenBlacklist::new(
                revocations,
                clock.clone(),
                options.blacklist_policy,
                timeout,
            )),
            attempts: Arc::new(LoginAttemptGuard::new(
                Arc::new(InMemoryAttemptStore::new(clock.clone())),
                options.lockout,
                timeout,
            )),
            sessions: sessions.clone(),
            users: users.clone(),
            hasher: hasher.clone(),
            scopes: Arc::new(ScopeResolver::new(RoleScopeMap::default_map())),
            audit: audit.clone(),
            clock: clock.clone(),
            lifetimes: options.lifetimes,
            storage_timeout: timeout,
        };

        Self {
            service: Arc::new(AuthService::new(components).expect("service")),
            clock,
            ledger,
            ledger_switch,
            users,
            sessions,
            hasher,
            audit,
        }
    }

    pub fn add_user(&self, username: &str, password: &str, roles: &[&str]) {
        self.users.insert(UserCredentials {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: format!("plain:{password}"),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            status: UserStatus::Active,
        });
    }
}

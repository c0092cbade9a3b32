/// Security audit events for auth service
///
/// Orchestration publishes events at fixed points of the login, refresh and
/// revocation flows. Publishing is synchronous and must never block or fail
/// the security decision that triggered it.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    TokenRefresh,
    TokenRotated,
    TokenReuseDetected,
    TokenRevoked,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventType::LoginFailure => "LOGIN_FAILURE",
            AuditEventType::TokenRefresh => "TOKEN_REFRESH",
            AuditEventType::TokenRotated => "TOKEN_ROTATED",
            AuditEventType::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            AuditEventType::TokenRevoked => "TOKEN_REVOKED",
        }
    }

    fn default_severity(self) -> AuditSeverity {
        match self {
            AuditEventType::LoginFailure => AuditSeverity::Warning,
            AuditEventType::TokenReuseDetected => AuditSeverity::Critical,
            _ => AuditSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// Structured audit record. `details` carries identifiers and reason codes
/// only; no free text and no PII beyond `username`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub details: BTreeMap<&'static str, String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, username: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            username: username.into(),
            timestamp,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &'static str, value: impl ToString) -> Self {
        self.details.insert(key, value.to_string());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn publish(&self, event: AuditEvent);
}

/// Emits every event as a structured `tracing` record on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn publish(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        match event.severity {
            AuditSeverity::Info => info!(
                target: "audit",
                event_type = event.event_type.as_str(),
                username = %event.username,
                timestamp = %event.timestamp,
                details = %details,
                "audit event"
            ),
            AuditSeverity::Warning => warn!(
                target: "audit",
                event_type = event.event_type.as_str(),
                username = %event.username,
                timestamp = %event.timestamp,
                details = %details,
                "audit event"
            ),
            AuditSeverity::Critical => error!(
                target: "audit",
                event_type = event.event_type.as_str(),
                username = %event.username,
                timestamp = %event.timestamp,
                details = %details,
                "audit event"
            ),
        }
    }
}

/// Hands events to a bounded channel drained by some other task (a
/// message-bus forwarder, for instance). A full or closed channel drops the
/// event with a warning.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn publish(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if let Err(err) = self.tx.try_send(event) {
            warn!(
                event_type = event_type.as_str(),
                reason = match err {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                },
                "audit event dropped"
            );
        }
    }
}

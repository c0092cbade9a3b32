use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

static LOGIN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auth_login_total",
        "Login attempts by outcome",
        &["outcome"]
    )
    .expect("auth_login_total metric can be registered")
});

static REFRESH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auth_refresh_total",
        "Refresh attempts by outcome",
        &["outcome"]
    )
    .expect("auth_refresh_total metric can be registered")
});

/// Incremented every time a consumed refresh token is presented again.
static TOKEN_REUSE_DETECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auth_token_reuse_detected_total",
        "Refresh token reuse detections (family revoked)"
    )
    .expect("auth_token_reuse_detected_total metric can be registered")
});

static TOKEN_VALIDATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auth_token_validation_failures_total",
        "Rejected access/refresh tokens by reason",
        &["reason"]
    )
    .expect("auth_token_validation_failures_total metric can be registered")
});

static BLACKLIST_FAIL_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auth_blacklist_fail_open_total",
        "Blacklist lookups that failed and were treated as not revoked"
    )
    .expect("auth_blacklist_fail_open_total metric can be registered")
});

static EXPIRED_REFRESH_TOKENS_SWEPT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auth_expired_refresh_tokens_swept_total",
        "Expired refresh token records deleted by the cleanup sweep"
    )
    .expect("auth_expired_refresh_tokens_swept_total metric can be registered")
});

pub fn record_login(outcome: &str) {
    LOGIN_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_refresh(outcome: &str) {
    REFRESH_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_reuse_detected() {
    TOKEN_REUSE_DETECTED_TOTAL.inc();
}

pub fn record_validation_failure(reason: &str) {
    TOKEN_VALIDATION_FAILURES_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn record_blacklist_fail_open() {
    BLACKLIST_FAIL_OPEN_TOTAL.inc();
}

pub fn record_swept(count: u64) {
    EXPIRED_REFRESH_TOKENS_SWEPT_TOTAL.inc_by(count);
}

/// Serialise the default registry in Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_text_output() {
        record_login("success");
        record_reuse_detected();
        record_validation_failure("expired");

        let text = gather_text();
        assert!(text.contains("auth_login_total"));
        assert!(text.contains("auth_token_reuse_detected_total"));
        assert!(text.contains("reason=\"expired\""));
    }

    #[test]
    fn test_reuse_counter_is_monotonic() {
        let before = TOKEN_REUSE_DETECTED_TOTAL.get();
        record_reuse_detected();
        assert!(TOKEN_REUSE_DETECTED_TOTAL.get() > before);
    }
}

/// Token codec for Nova auth
///
/// Signs and verifies access and refresh tokens with RS256 (RSA with SHA-256).
/// This module is the only place that understands the wire representation of
/// token claims.
///
/// ## Security Design
///
/// - **RS256 ONLY**: tokens declaring any other algorithm are rejected
/// - **Key ring**: exactly one active signing key, any number of trusted
///   verification keys, selected by the `kid` header
/// - **Audience per token use**: access and refresh tokens carry different
///   audiences so one can never be replayed as the other
/// - **No leakage**: verification errors never carry claim values or token text
///
/// ## Key rotation
///
/// ```rust,no_run
/// # async fn rotate(codec: &crypto_core::TokenCodec, pem: &str, public: &str) {
/// // New key signs from now on, the previous one is still trusted.
/// codec.rotate_signing_key("2025-06", pem, public).await.unwrap();
/// // Once every token signed with the old key has expired:
/// codec.retire_key("2025-01").await.unwrap();
/// # }
/// ```
use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;

// ============================================================================
// Constants
// ============================================================================

/// JWT algorithm - MUST be RS256 for all Nova services
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    #[error("malformed token")]
    MalformedToken,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("unexpected token type")]
    InvalidTokenType,

    #[error("token lifetime must be positive")]
    InvalidLifetime,

    #[error("failed to encode token")]
    Encoding,

    #[error("key error: {0}")]
    Key(String),

    #[error("codec configuration error: {0}")]
    Configuration(String),
}

impl JwtError {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::MissingClaim(_) => "missing_claim",
            Self::InvalidAudience => "invalid_audience",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidTokenType => "invalid_token_type",
            Self::InvalidLifetime => "invalid_lifetime",
            Self::Encoding => "encoding",
            Self::Key(_) => "key",
            Self::Configuration(_) => "configuration",
        }
    }

    /// True for failures caused by the presented token rather than by the
    /// codec's own keys or configuration.
    pub fn is_token_failure(&self) -> bool {
        !matches!(
            self,
            Self::InvalidLifetime | Self::Encoding | Self::Key(_) | Self::Configuration(_)
        )
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Declared purpose of a token (`token_use` claim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

impl TokenUse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Unique token identifier
    pub jti: String,
    pub token_use: TokenUse,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A freshly signed token together with the facts callers need to persist it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Plaintext `jti`. Callers hash it before storing anything.
    pub jti: String,
    pub token_use: TokenUse,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Claims as they arrive on the wire. Everything is optional so that a
/// missing claim is reported as such instead of as a parse failure.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    jti: Option<String>,
    token_use: Option<String>,
    iss: Option<String>,
    aud: Option<Audience>,
    iat: Option<i64>,
    exp: Option<i64>,
    nbf: Option<i64>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

#[derive(Serialize)]
struct KeyProbe<'a> {
    kid: &'a str,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub issuer: String,
    pub access_audience: String,
    pub refresh_audience: String,
    /// Clock-skew tolerance applied to `exp` and `nbf`
    pub leeway_secs: u64,
}

impl CodecConfig {
    pub fn new(
        issuer: impl Into<String>,
        access_audience: impl Into<String>,
        refresh_audience: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            access_audience: access_audience.into(),
            refresh_audience: refresh_audience.into(),
            leeway_secs: 0,
        }
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn audience_for(&self, token_use: TokenUse) -> &str {
        match token_use {
            TokenUse::Access => &self.access_audience,
            TokenUse::Refresh => &self.refresh_audience,
        }
    }

    fn validate(&self) -> Result<(), JwtError> {
        if self.issuer.trim().is_empty() {
            return Err(JwtError::Configuration("issuer must not be empty".into()));
        }
        if self.access_audience.trim().is_empty() || self.refresh_audience.trim().is_empty() {
            return Err(JwtError::Configuration("audiences must not be empty".into()));
        }
        if self.access_audience == self.refresh_audience {
            return Err(JwtError::Configuration(
                "access and refresh audiences must differ".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Key Ring
// ============================================================================

struct KeyRing {
    active_kid: String,
    signing: EncodingKey,
    trusted: HashMap<String, DecodingKey>,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

fn require_kid(kid: &str) -> Result<(), JwtError> {
    if kid.trim().is_empty() {
        return Err(JwtError::Key("key id must not be empty".into()));
    }
    Ok(())
}

fn parse_public_key(kid: &str, public_key_pem: &str) -> Result<DecodingKey, JwtError> {
    DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| JwtError::Key(format!("failed to parse RSA public key {kid}: {e}")))
}

/// Parse a PEM pair and prove that the private key's signatures verify
/// under the public key.
fn load_key_pair(kid: &str, private_key_pem: &str, public_key_pem: &str) -> Result<KeyPair, JwtError> {
    require_kid(kid)?;

    let encoding = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| JwtError::Key(format!("failed to parse RSA private key {kid}: {e}")))?;
    let decoding = parse_public_key(kid, public_key_pem)?;

    let probe = encode(&Header::new(JWT_ALGORITHM), &KeyProbe { kid }, &encoding)
        .map_err(|e| JwtError::Key(format!("failed to sign with key {kid}: {e}")))?;
    decode::<IgnoredAny>(&probe, &decoding, &permissive_validation())
        .map_err(|_| JwtError::Key(format!("private and public key {kid} do not form a pair")))?;

    Ok(KeyPair { encoding, decoding })
}

/// Signature-only validation: time, audience and presence checks are done
/// by the codec against its own clock and configuration.
fn permissive_validation() -> Validation {
    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

fn required(value: Option<String>, claim: &'static str) -> Result<String, JwtError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(JwtError::MissingClaim(claim)),
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Issues and verifies access/refresh tokens.
pub struct TokenCodec {
    config: CodecConfig,
    keys: RwLock<KeyRing>,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Create a codec whose active signing key is `kid`.
    pub fn new(
        config: CodecConfig,
        kid: &str,
        private_key_pem: &str,
        public_key_pem: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, JwtError> {
        config.validate()?;
        let pair = load_key_pair(kid, private_key_pem, public_key_pem)?;

        let mut trusted = HashMap::new();
        trusted.insert(kid.to_string(), pair.decoding);

        info!(kid = %kid, issuer = %config.issuer, "token codec initialized with RS256");

        Ok(Self {
            config,
            keys: RwLock::new(KeyRing {
                active_kid: kid.to_string(),
                signing: pair.encoding,
                trusted,
            }),
            validation: permissive_validation(),
            clock,
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Key management
    // ------------------------------------------------------------------------

    /// Make `kid` the signing key. The previous signing key stays trusted
    /// for verification until it is retired.
    pub async fn rotate_signing_key(
        &self,
        kid: &str,
        private_key_pem: &str,
        public_key_pem: &str,
    ) -> Result<(), JwtError> {
        let pair = load_key_pair(kid, private_key_pem, public_key_pem)?;

        let mut keys = self.keys.write().await;
        let previous = std::mem::replace(&mut keys.active_kid, kid.to_string());
        keys.signing = pair.encoding;
        keys.trusted.insert(kid.to_string(), pair.decoding);

        info!(previous_kid = %previous, new_kid = %kid, "JWT signing key rotated");
        Ok(())
    }

    /// Trust an additional verification-only key.
    pub async fn trust_verification_key(&self, kid: &str, public_key_pem: &str) -> Result<(), JwtError> {
        require_kid(kid)?;
        let decoding = parse_public_key(kid, public_key_pem)?;

        self.keys.write().await.trusted.insert(kid.to_string(), decoding);
        info!(kid = %kid, "verification key trusted");
        Ok(())
    }

    /// Stop trusting `kid`. Returns whether the key was trusted before.
    /// The active signing key cannot be retired.
    pub async fn retire_key(&self, kid: &str) -> Result<bool, JwtError> {
        let mut keys = self.keys.write().await;
        if keys.active_kid == kid {
            return Err(JwtError::Key(format!("cannot retire active signing key {kid}")));
        }

        let removed = keys.trusted.remove(kid).is_some();
        if removed {
            info!(kid = %kid, "verification key retired");
        }
        Ok(removed)
    }

    pub async fn active_kid(&self) -> String {
        self.keys.read().await.active_kid.clone()
    }

    pub async fn trusted_kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.keys.read().await.trusted.keys().cloned().collect();
        kids.sort();
        kids
    }

    // ------------------------------------------------------------------------
    // Token Generation
    // ------------------------------------------------------------------------

    pub async fn issue_access_token(
        &self,
        subject: &str,
        roles: &[String],
        scopes: &[String],
        ttl: Duration,
    ) -> Result<IssuedToken, JwtError> {
        self.issue(subject, TokenUse::Access, roles.to_vec(), scopes.to_vec(), ttl)
            .await
    }

    pub async fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> Result<IssuedToken, JwtError> {
        self.issue(subject, TokenUse::Refresh, Vec::new(), Vec::new(), ttl)
            .await
    }

    async fn issue(
        &self,
        subject: &str,
        token_use: TokenUse,
        roles: Vec<String>,
        scopes: Vec<String>,
        ttl: Duration,
    ) -> Result<IssuedToken, JwtError> {
        if subject.trim().is_empty() {
            return Err(JwtError::MissingClaim("sub"));
        }
        let ttl = Duration::seconds(ttl.num_seconds());
        if ttl <= Duration::zero() {
            return Err(JwtError::InvalidLifetime);
        }

        let issued_at = self.clock.now().trunc_subsecs(0);
        let expires_at = issued_at + ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: subject.to_string(),
            jti: jti.clone(),
            token_use,
            iss: self.config.issuer.clone(),
            aud: self.config.audience_for(token_use).to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            nbf: Some(issued_at.timestamp()),
            roles,
            scopes,
        };

        let keys = self.keys.read().await;
        let mut header = Header::new(JWT_ALGORITHM);
        header.kid = Some(keys.active_kid.clone());

        let token = encode(&header, &claims, &keys.signing).map_err(|e| {
            warn!(kid = %keys.active_kid, error = %e, "failed to sign token");
            JwtError::Encoding
        })?;

        Ok(IssuedToken {
            token,
            jti,
            token_use,
            issued_at,
            expires_at,
        })
    }

    // ------------------------------------------------------------------------
    // Token Validation
    // ------------------------------------------------------------------------

    /// Verify signature, mandatory claims, issuer, audience (for the token's
    /// declared use), `exp` and `nbf`.
    pub async fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let result = self.verify_inner(token).await;
        if let Err(err) = &result {
            debug!(reason = err.reason(), "token verification failed");
        }
        result
    }

    /// [`verify`](Self::verify) and additionally require `token_use == expected`.
    pub async fn verify_as(&self, token: &str, expected: TokenUse) -> Result<Claims, JwtError> {
        let claims = self.verify(token).await?;
        if claims.token_use != expected {
            debug!(
                expected = expected.as_str(),
                actual = claims.token_use.as_str(),
                "token presented in the wrong context"
            );
            return Err(JwtError::InvalidTokenType);
        }
        Ok(claims)
    }

    async fn verify_inner(&self, token: &str) -> Result<Claims, JwtError> {
        if token.trim().is_empty() {
            return Err(JwtError::MalformedToken);
        }

        let header = decode_header(token).map_err(|_| JwtError::MalformedToken)?;
        if header.alg != JWT_ALGORITHM {
            return Err(JwtError::InvalidSignature);
        }

        let raw = {
            let keys = self.keys.read().await;
            let candidates: Vec<&DecodingKey> = match header.kid.as_deref() {
                Some(kid) => vec![keys.trusted.get(kid).ok_or(JwtError::InvalidSignature)?],
                None => keys.trusted.values().collect(),
            };

            let mut verified = None;
            for key in candidates {
                match decode::<RawClaims>(token, key, &self.validation) {
                    Ok(data) => {
                        verified = Some(data.claims);
                        break;
                    }
                    Err(err) => match err.kind() {
                        ErrorKind::InvalidSignature => continue,
                        ErrorKind::InvalidAlgorithm
                        | ErrorKind::InvalidRsaKey(_)
                        | ErrorKind::InvalidKeyFormat => return Err(JwtError::InvalidSignature),
                        _ => return Err(JwtError::MalformedToken),
                    },
                }
            }
            verified.ok_or(JwtError::InvalidSignature)?
        };

        self.check_claims(raw)
    }

    fn check_claims(&self, raw: RawClaims) -> Result<Claims, JwtError> {
        let sub = required(raw.sub, "sub")?;
        let jti = required(raw.jti, "jti")?;
        let token_use = required(raw.token_use, "token_use")?;
        let token_use = TokenUse::parse(&token_use).ok_or(JwtError::InvalidTokenType)?;
        let exp = raw.exp.ok_or(JwtError::MissingClaim("exp"))?;
        let iat = raw.iat.ok_or(JwtError::MissingClaim("iat"))?;

        if raw.iss.as_deref() != Some(self.config.issuer.as_str()) {
            return Err(JwtError::InvalidIssuer);
        }

        let expected_audience = self.config.audience_for(token_use);
        match &raw.aud {
            Some(aud) if aud.contains(expected_audience) => {}
            _ => return Err(JwtError::InvalidAudience),
        }

        let now = self.clock.now().timestamp();
        let leeway = i64::try_from(self.config.leeway_secs).unwrap_or(i64::MAX);
        if now >= exp.saturating_add(leeway) {
            return Err(JwtError::Expired);
        }
        if let Some(nbf) = raw.nbf {
            if nbf > now.saturating_add(leeway) {
                return Err(JwtError::NotYetValid);
            }
        }

        Ok(Claims {
            sub,
            jti,
            token_use,
            iss: self.config.issuer.clone(),
            aud: expected_audience.to_string(),
            iat,
            exp,
            nbf: raw.nbf,
            roles: raw.roles,
            scopes: raw.scopes,
        })
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

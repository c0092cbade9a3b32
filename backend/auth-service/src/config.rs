//! Configuration management for the auth service
//!
//! Settings come from environment variables, with a `.env` file loaded
//! first in debug builds. Every backend choice is made here and acted on
//! once, at startup.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::attempts::LockoutPolicy;
use crate::blacklist::BlacklistFailurePolicy;
use crate::security::RoleScopeMap;
use crate::services::{CleanupSettings, TokenLifetimes};

#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt: JwtSettings,
    pub tokens: TokenLifetimes,
    pub lockout: LockoutPolicy,
    pub role_scopes: RoleScopeMap,
    pub backends: BackendSettings,
    pub database: Option<DatabaseSettings>,
    pub redis: Option<RedisSettings>,
    pub storage_timeout: Duration,
    pub blacklist_failure_policy: BlacklistFailurePolicy,
    pub cleanup: CleanupSettings,
}

/// Raw environment, one field per variable (`jwt_issuer` reads
/// `JWT_ISSUER`). No `Debug`: it holds key material and connection URLs.
#[derive(Deserialize)]
struct EnvVars {
    jwt_private_key: String,
    jwt_public_key: String,
    #[serde(default = "default_key_id")]
    jwt_key_id: String,
    #[serde(default)]
    jwt_additional_public_keys: String,
    #[serde(default = "default_issuer")]
    jwt_issuer: String,
    #[serde(default = "default_access_audience")]
    jwt_access_audience: String,
    #[serde(default = "default_refresh_audience")]
    jwt_refresh_audience: String,
    #[serde(default)]
    jwt_leeway_seconds: u64,

    #[serde(default = "default_access_ttl")]
    access_token_ttl_seconds: i64,
    #[serde(default = "default_refresh_ttl")]
    refresh_token_ttl_seconds: i64,

    #[serde(default = "default_max_attempts")]
    login_max_attempts: u32,
    #[serde(default = "default_login_window")]
    login_window_seconds: u64,
    #[serde(default = "default_lockout")]
    login_lockout_seconds: u64,
    #[serde(default = "default_max_lockout")]
    login_max_lockout_seconds: u64,

    role_scopes: Option<String>,

    #[serde(default = "default_ledger_backend", deserialize_with = "deserialize_parsed")]
    ledger_backend: LedgerBackend,
    #[serde(default = "default_cache_backend", deserialize_with = "deserialize_parsed")]
    cache_backend: CacheBackend,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    redis_url: Option<String>,

    #[serde(default = "default_storage_timeout_ms")]
    storage_timeout_ms: u64,
    #[serde(default, deserialize_with = "deserialize_parsed")]
    blacklist_failure_policy: BlacklistFailurePolicy,
    #[serde(default = "default_cleanup_interval")]
    cleanup_interval_seconds: u64,
    #[serde(default)]
    cleanup_grace_seconds: i64,
}

fn default_key_id() -> String {
    "primary".to_string()
}

fn default_issuer() -> String {
    "nova-auth".to_string()
}

fn default_access_audience() -> String {
    "nova-api".to_string()
}

fn default_refresh_audience() -> String {
    "nova-auth-refresh".to_string()
}

fn default_access_ttl() -> i64 {
    900
}

fn default_refresh_ttl() -> i64 {
    2_592_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_login_window() -> u64 {
    900
}

fn default_lockout() -> u64 {
    300
}

fn default_max_lockout() -> u64 {
    3600
}

fn default_ledger_backend() -> LedgerBackend {
    LedgerBackend::Postgres
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Redis
}

fn default_max_connections() -> u32 {
    20
}

fn default_storage_timeout_ms() -> u64 {
    2000
}

fn default_cleanup_interval() -> u64 {
    3600
}

/// Enum-valued variables go through their `FromStr` impls.
fn deserialize_parsed<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
        }

        let vars: EnvVars = envy::from_env().context("Invalid environment")?;
        let settings = Self::from_vars(vars)?;
        settings.validate()?;

        info!(
            ledger = %settings.backends.ledger,
            cache = %settings.backends.cache,
            blacklist_policy = %settings.blacklist_failure_policy,
            "configuration loaded"
        );
        Ok(settings)
    }

    fn from_vars(vars: EnvVars) -> Result<Self> {
        let backends = BackendSettings {
            ledger: vars.ledger_backend,
            cache: vars.cache_backend,
        };
        let database = vars.database_url.map(|url| DatabaseSettings {
            url,
            max_connections: vars.database_max_connections,
        });
        if backends.ledger == LedgerBackend::Postgres && database.is_none() {
            bail!("DATABASE_URL must be set when LEDGER_BACKEND=postgres");
        }
        let redis = vars.redis_url.map(|url| RedisSettings { url });
        if backends.cache == CacheBackend::Redis && redis.is_none() {
            bail!("REDIS_URL must be set when CACHE_BACKEND=redis");
        }

        let role_scopes = match vars.role_scopes {
            Some(raw) if !raw.trim().is_empty() => {
                RoleScopeMap::parse(&raw).context("Invalid ROLE_SCOPES")?
            }
            _ => RoleScopeMap::default_map(),
        };

        let jwt = JwtSettings {
            key_id: vars.jwt_key_id,
            private_key_pem: load_pem(&vars.jwt_private_key).context("Invalid JWT_PRIVATE_KEY")?,
            public_key_pem: load_pem(&vars.jwt_public_key).context("Invalid JWT_PUBLIC_KEY")?,
            additional_public_keys: parse_additional_keys(&vars.jwt_additional_public_keys)?,
            issuer: vars.jwt_issuer,
            access_audience: vars.jwt_access_audience,
            refresh_audience: vars.jwt_refresh_audience,
            leeway_secs: vars.jwt_leeway_seconds,
        };

        Ok(Settings {
            jwt,
            tokens: TokenLifetimes {
                access_ttl: chrono::Duration::seconds(vars.access_token_ttl_seconds),
                refresh_ttl: chrono::Duration::seconds(vars.refresh_token_ttl_seconds),
            },
            lockout: LockoutPolicy {
                max_attempts: vars.login_max_attempts,
                window: Duration::from_secs(vars.login_window_seconds),
                lockout: Duration::from_secs(vars.login_lockout_seconds),
                max_lockout: Duration::from_secs(vars.login_max_lockout_seconds),
            },
            role_scopes,
            backends,
            database,
            redis,
            storage_timeout: Duration::from_millis(vars.storage_timeout_ms),
            blacklist_failure_policy: vars.blacklist_failure_policy,
            cleanup: CleanupSettings {
                interval: Duration::from_secs(vars.cleanup_interval_seconds),
                grace: chrono::Duration::seconds(vars.cleanup_grace_seconds),
            },
        })
    }

    fn validate(&self) -> Result<()> {
        if self.tokens.access_ttl <= chrono::Duration::zero()
            || self.tokens.refresh_ttl <= chrono::Duration::zero()
        {
            bail!("token TTLs must be positive");
        }
        if self.lockout.max_attempts == 0 {
            bail!("LOGIN_MAX_ATTEMPTS must be at least 1");
        }
        if self.lockout.window.is_zero() || self.lockout.lockout.is_zero() {
            bail!("LOGIN_WINDOW_SECONDS and LOGIN_LOCKOUT_SECONDS must be positive");
        }
        if self.lockout.max_lockout < self.lockout.lockout {
            bail!("LOGIN_MAX_LOCKOUT_SECONDS must not be below LOGIN_LOCKOUT_SECONDS");
        }
        if self.storage_timeout.is_zero() {
            bail!("STORAGE_TIMEOUT_MS must be positive");
        }
        if self.cleanup.interval.is_zero() {
            bail!("CLEANUP_INTERVAL_SECONDS must be positive");
        }
        if self.jwt.access_audience == self.jwt.refresh_audience {
            bail!("JWT_ACCESS_AUDIENCE and JWT_REFRESH_AUDIENCE must differ");
        }
        Ok(())
    }
}

/// JWT signing and verification settings
#[derive(Clone)]
pub struct JwtSettings {
    pub key_id: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
    /// Extra `(kid, public PEM)` pairs trusted for verification only.
    pub additional_public_keys: Vec<(String, String)>,
    pub issuer: String,
    pub access_audience: String,
    pub refresh_audience: String,
    pub leeway_secs: u64,
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("key_id", &self.key_id)
            .field(
                "additional_kids",
                &self
                    .additional_public_keys
                    .iter()
                    .map(|(kid, _)| kid.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("issuer", &self.issuer)
            .field("access_audience", &self.access_audience)
            .field("refresh_audience", &self.refresh_audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown ledger backend: {other}")),
        }
    }
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        })
    }
}

/// Backend for the blacklist, attempt counters and session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown cache backend: {other}")),
        }
    }
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSettings {
    pub ledger: LedgerBackend,
    pub cache: CacheBackend,
}

/// Database connection settings
#[derive(Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

/// Redis cache settings
#[derive(Clone)]
pub struct RedisSettings {
    pub url: String,
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings").finish_non_exhaustive()
    }
}

/// A PEM given inline, or a path to a PEM file.
fn load_pem(value: &str) -> Result<String> {
    let value = value.trim();
    if value.starts_with("-----BEGIN") {
        return Ok(value.replace("\\n", "\n"));
    }
    std::fs::read_to_string(value).with_context(|| format!("failed to read PEM file {value}"))
}

/// `kid=path.pem,kid2=path2.pem`
fn parse_additional_keys(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kid, path) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed JWT_ADDITIONAL_PUBLIC_KEYS entry: {entry}"))?;
            let kid = kid.trim();
            if kid.is_empty() {
                bail!("empty kid in JWT_ADDITIONAL_PUBLIC_KEYS");
            }
            Ok((kid.to_string(), load_pem(path)?))
        })
        .collect()
}

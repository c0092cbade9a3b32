/// Password hashing and verification using Argon2id
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use tracing::warn;

use crate::error::{AuthError, Result};

/// Opaque password hashing port. The login flow never inspects hashes.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, raw: &str) -> Result<String>;

    /// `false` for a wrong password and for an unparseable stored hash.
    fn matches(&self, raw: &str, hash: &str) -> bool;
}

/// Argon2id with the crate's default parameters, PHC string output.
#[derive(Clone, Default)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, raw: &str) -> Result<String> {
        let salt = SaltString::generate(rand::thread_rng());

        let password_hash = self
            .argon2
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|_| AuthError::Internal("Failed to hash password".to_string()))?
            .to_string();

        Ok(password_hash)
    }

    fn matches(&self, raw: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Stored password hash is not a valid PHC string");
                return false;
            }
        };

        self.argon2
            .verify_password(raw.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

// Auth Service Library
//
// Token lifecycle core: RS256 access/refresh issuance, refresh rotation with
// reuse detection, access-token blacklisting, login lockout and a session
// registry. Transport layers embed it through `services::AuthService`.

pub mod attempts;
pub mod audit;
pub mod blacklist;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod security;
pub mod services;
pub mod sessions;
pub mod storage;
pub mod users;

pub use crypto_core::clock;
pub use error::{AuthError, ErrorCategory, Result};
pub use services::{AuthComponents, AuthService, TokenLifetimes};

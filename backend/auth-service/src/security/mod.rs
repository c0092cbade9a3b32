/// Security primitives for authentication
/// Provides password hashing and role-to-scope resolution
pub mod password;
pub mod scopes;

pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use scopes::{require_scope, RoleScopeMap, ScopeMapError, ScopeResolver};

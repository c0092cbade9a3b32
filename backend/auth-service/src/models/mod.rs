/// Data models for authentication
pub mod auth;
pub mod refresh_token;
pub mod session;
pub mod user;

pub use auth::{LoginRequest, Principal, TokenPair};
pub use refresh_token::{NewRefreshToken, RefreshTokenRecord};
pub use session::SessionEntry;
pub use user::{UserCredentials, UserStatus};

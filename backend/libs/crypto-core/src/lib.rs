//! Shared token primitives for Nova auth.
//!
//! - [`clock`]: injectable time source
//! - [`jwt`]: RS256 token codec with a rotating key ring
//! - [`hash`]: one-way hashing of token identifiers

pub mod clock;
pub mod hash;
pub mod jwt;

pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::{Claims, CodecConfig, IssuedToken, JwtError, TokenCodec, TokenUse};

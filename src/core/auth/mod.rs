//! Authentication module for collab-notes
//!
//! Provides JWT access token generation and validation. Identities on the
//! collaboration socket are resolved from these tokens.

pub mod jwt;

pub use jwt::{Claims, JwtConfig, JwtError, JwtService};

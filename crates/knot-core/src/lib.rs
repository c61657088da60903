//! Knot Core
//!
//! Shared building blocks for the Knot terminal server:
//! - Auth: user identities, the credential verifier seam, and a token store
//! - Error: core error type and CLI-friendly formatting
//! - Shutdown: phased graceful shutdown and signal handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod error;
pub mod shutdown;

pub use auth::{
    AuthContext, AuthError, AuthMethod, AuthStore, CredentialVerifier, TokenInfo, UserIdentity,
};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use shutdown::{wait_for_shutdown_signal, ConnectionGuard, ShutdownController, ShutdownPhase};

//! Error types for knot-core
//!
//! This module provides the core error type and user-friendly error formatting.

use crate::auth::AuthError;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("invalid configuration: {field}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Authentication failure
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an `InvalidConfig` error
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Human-readable messages and fix suggestions for CLI output
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::InvalidConfig { field, message } => {
                format!("Configuration error in '{}': {}", field, message)
            }
            Error::Auth(e) => format!("Authentication error: {}", e),
            Error::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::InvalidConfig { field, .. } => Some(format!(
                "Check the '{}' setting in config/default.toml or the matching KNOT_ environment variable.",
                field
            )),
            Error::Auth(AuthError::Internal(_)) => Some(
                "Regenerate the digest with `knot hash-token <token>` and update [[auth.tokens]]."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_message() {
        let error = Error::invalid_config("terminal.program", "must not be empty");

        let msg = error.user_message();
        assert!(msg.contains("terminal.program"));
        assert!(msg.contains("must not be empty"));

        let suggestion = error.suggestion().unwrap();
        assert!(suggestion.contains("KNOT_"));
    }

    #[test]
    fn test_auth_error_conversion() {
        let error: Error = AuthError::Internal("bad digest".to_string()).into();
        assert!(matches!(error, Error::Auth(_)));
        assert!(error.suggestion().unwrap().contains("hash-token"));
    }

    #[test]
    fn test_format_error_for_cli() {
        let error = Error::Internal("boom".to_string());
        let out = format_error_for_cli(&error);
        assert_eq!(out, "Internal error: boom");

        let out = format_error_for_cli(&Error::invalid_config("server.port", "must be non-zero"));
        assert!(out.contains("server.port"));
        assert!(out.contains("\n\n"));
    }
}

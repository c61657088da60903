//! Configuration validation
//!
//! Hard errors for settings the server cannot run with, warnings for risky ones.

use knot_core::{AuthStore, Error, Result};
use tracing::warn;

use super::config::AppConfig;

/// Validate configuration before anything is started
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.server.port == 0 {
        return Err(Error::invalid_config("server.port", "must not be 0"));
    }

    if !config.terminal.path.starts_with('/') {
        return Err(Error::invalid_config(
            "terminal.path",
            format!("must start with '/', got '{}'", config.terminal.path),
        ));
    }

    if config.terminal.process_spec().program.trim().is_empty() {
        return Err(Error::invalid_config(
            "terminal.program",
            "no program configured and no platform shell found",
        ));
    }

    for (i, entry) in config.auth.tokens.iter().enumerate() {
        if entry.user.trim().is_empty() {
            return Err(Error::invalid_config(
                format!("auth.tokens[{}].user", i),
                "must not be empty",
            ));
        }
        AuthStore::parse_hex_digest(&entry.token_sha256).map_err(|_| {
            Error::invalid_config(
                format!("auth.tokens[{}].token_sha256", i),
                "expected a 64-character hex SHA-256 digest",
            )
        })?;
    }

    if config.auth.tokens.is_empty() {
        warn!("No auth tokens configured; every terminal connection will be rejected");
    }

    if config.server.host == "0.0.0.0" {
        warn!(
            "SECURITY WARNING: Server is binding to all interfaces (0.0.0.0) and exposes a shell. \
             Consider binding to 127.0.0.1 and using a reverse proxy."
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::TokenEntry;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.terminal.program = "sh".to_string();
        config.auth.tokens.push(TokenEntry {
            user: "alice".to_string(),
            token_sha256: AuthStore::hash_to_hex(&AuthStore::hash_token("secret")),
            label: None,
        });
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = valid();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = valid();
        config.terminal.path = "terminal".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_digest_rejected() {
        let mut config = valid();
        config.auth.tokens[0].token_sha256 = "not-hex".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("auth.tokens[0].token_sha256"));
    }

    #[test]
    fn test_blank_user_rejected() {
        let mut config = valid();
        config.auth.tokens[0].user = " ".to_string();
        assert!(validate_config(&config).is_err());
    }
}

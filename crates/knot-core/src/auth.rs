//! Authentication module
//!
//! Provides:
//! - `UserIdentity`, the stable principal a terminal session is keyed by
//! - `CredentialVerifier`, the seam the connection handler authenticates through
//! - `AuthStore`, a token store holding SHA-256 digests of bearer tokens
//! - Constant-time token comparison

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credentials provided
    #[error("Authentication required")]
    MissingCredentials,

    /// Unknown token
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token has been revoked
    #[error("Token revoked")]
    TokenRevoked,

    /// Malformed stored digest or poisoned state
    #[error("Auth internal error: {0}")]
    Internal(String),
}

/// Auth result type
pub type Result<T> = std::result::Result<T, AuthError>;

// ============================================================================
// Identity
// ============================================================================

/// Opaque, comparable identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Wrap a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Auth Context
// ============================================================================

/// Where the credential was found on the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>`
    BearerToken,
    /// `X-API-Key: <token>`
    ApiKey,
    /// `?token=<token>` (browsers cannot set headers on WebSocket upgrades)
    QueryToken,
}

/// Authenticated context attached to each request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Verified principal
    pub identity: UserIdentity,
    /// How the credential was presented
    pub method: AuthMethod,
}

// ============================================================================
// Verifier seam
// ============================================================================

/// Maps an opaque credential to a stable identity.
///
/// Callers treat every `Err` as "reject" without inspecting the reason.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a raw credential.
    async fn verify(&self, credential: &str) -> Result<UserIdentity>;
}

// ============================================================================
// Auth Store
// ============================================================================

/// Internal representation of a registered token
#[derive(Debug, Clone)]
struct StoredToken {
    /// SHA-256 of the token (the raw token is never stored)
    token_hash: [u8; 32],
    identity: UserIdentity,
    label: String,
    created_at: DateTime<Utc>,
    revoked: bool,
}

/// Public view of a registered token
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    /// Hex digest (lookup key)
    pub token_hash: String,
    /// Owner
    pub identity: UserIdentity,
    /// Human-readable label
    pub label: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Revocation flag
    pub revoked: bool,
}

/// In-memory token store keyed by token digest.
pub struct AuthStore {
    /// token_hash_hex → StoredToken
    tokens: RwLock<HashMap<String, StoredToken>>,
}

impl AuthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Lower-case hex rendering of a digest
    pub fn hash_to_hex(hash: &[u8; 32]) -> String {
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 64-character hex digest
    pub fn parse_hex_digest(hex: &str) -> Result<[u8; 32]> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(AuthError::Internal(format!(
                "token digest must be 64 hex characters, got {}",
                hex.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| AuthError::Internal(format!("invalid token digest: {}", e)))?;
        }
        Ok(out)
    }

    /// Register a raw token for a user. Returns the digest hex.
    pub fn register_token(
        &self,
        identity: UserIdentity,
        token: &str,
        label: &str,
    ) -> Result<String> {
        let hash = Self::hash_token(token);
        self.insert(identity, hash, label)
    }

    /// Register a precomputed digest (from configuration) for a user.
    pub fn register_digest(
        &self,
        identity: UserIdentity,
        token_sha256: &str,
        label: &str,
    ) -> Result<String> {
        let hash = Self::parse_hex_digest(token_sha256)?;
        self.insert(identity, hash, label)
    }

    fn insert(&self, identity: UserIdentity, token_hash: [u8; 32], label: &str) -> Result<String> {
        let hex = Self::hash_to_hex(&token_hash);
        let stored = StoredToken {
            token_hash,
            identity: identity.clone(),
            label: label.to_string(),
            created_at: Utc::now(),
            revoked: false,
        };

        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;
        tokens.insert(hex.clone(), stored);

        info!(user = %identity, label = %label, digest_prefix = %&hex[..8], "Token registered");
        Ok(hex)
    }

    /// Synchronous validation used by the `CredentialVerifier` impl
    pub fn validate_token(&self, token: &str) -> Result<UserIdentity> {
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let token_hash = Self::hash_token(token);
        let token_hash_hex = Self::hash_to_hex(&token_hash);

        let tokens = self
            .tokens
            .read()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;

        let Some(stored) = tokens.get(&token_hash_hex) else {
            warn!("Invalid token attempt");
            return Err(AuthError::InvalidCredentials);
        };

        let hashes_match: bool = stored.token_hash.ct_eq(&token_hash).into();
        if !hashes_match {
            return Err(AuthError::InvalidCredentials);
        }

        if stored.revoked {
            return Err(AuthError::TokenRevoked);
        }

        debug!(user = %stored.identity, label = %stored.label, "Token validated");
        Ok(stored.identity.clone())
    }

    /// Revoke a token by its digest hex
    pub fn revoke(&self, token_hash_hex: &str) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;

        match tokens.get_mut(token_hash_hex) {
            Some(stored) => {
                stored.revoked = true;
                info!(user = %stored.identity, label = %stored.label, "Token revoked");
                Ok(())
            }
            None => Err(AuthError::InvalidCredentials),
        }
    }

    /// List registered tokens
    pub fn list_tokens(&self) -> Result<Vec<TokenInfo>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;

        let mut list: Vec<TokenInfo> = tokens
            .iter()
            .map(|(hex, stored)| TokenInfo {
                token_hash: hex.clone(),
                identity: stored.identity.clone(),
                label: stored.label.clone(),
                created_at: stored.created_at,
                revoked: stored.revoked,
            })
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    /// Number of non-revoked tokens
    pub fn active_token_count(&self) -> usize {
        self.tokens
            .read()
            .map(|tokens| tokens.values().filter(|t| !t.revoked).count())
            .unwrap_or(0)
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialVerifier for AuthStore {
    async fn verify(&self, credential: &str) -> Result<UserIdentity> {
        self.validate_token(credential)
    }
}

#[cfg(test)]
mod tests;

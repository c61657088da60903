//! Authentication middleware for Axum
//!
//! Extracts Bearer tokens or API keys from requests and validates them
//! against the configured `CredentialVerifier`. Provides the `RequireAuth`
//! extractor for handlers, including WebSocket upgrades, so a rejected
//! request never reaches the upgrade.

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use knot_core::auth::{AuthContext, AuthError, AuthMethod, CredentialVerifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Verifier shared through request extensions
pub type SharedVerifier = Arc<dyn CredentialVerifier>;

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl AuthErrorResponse {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Auth rejection type
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new(
                    "Authentication required. Provide Authorization: Bearer <token>, X-API-Key or ?token=.",
                    "UNAUTHORIZED",
                ),
            },
            AuthError::InvalidCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid token or API key", "INVALID_CREDENTIALS"),
            },
            AuthError::TokenRevoked => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Token has been revoked", "TOKEN_REVOKED"),
            },
            AuthError::Internal(msg) => AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: AuthErrorResponse::new(msg, "INTERNAL_ERROR"),
            },
        }
    }
}

// ============================================================================
// RequireAuth Extractor
// ============================================================================

/// Axum extractor that requires a valid credential.
///
/// Extracts the token from:
/// 1. `Authorization: Bearer <token>` header
/// 2. `X-API-Key: <key>` header
/// 3. `?token=<token>` query parameter (for WebSocket connections)
pub struct RequireAuth(pub AuthContext);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let verifier = parts
            .extensions
            .get::<SharedVerifier>()
            .cloned()
            .ok_or_else(|| AuthError::Internal("Credential verifier not configured".to_string()))?;

        let (token, method) = extract_token(parts)?;
        let identity = verifier.verify(&token).await.map_err(|e| {
            debug!(method = ?method, error = %e, "Credential rejected");
            e
        })?;

        Ok(RequireAuth(AuthContext { identity, method }))
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract token from request headers or query params
fn extract_token(parts: &Parts) -> std::result::Result<(String, AuthMethod), AuthError> {
    // 1. Authorization: Bearer <token>
    if let Some(auth_header) = parts.headers.get("authorization") {
        if let Ok(value) = auth_header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Ok((token.trim().to_string(), AuthMethod::BearerToken));
            }
        }
    }

    // 2. X-API-Key header
    if let Some(api_key_header) = parts.headers.get("x-api-key") {
        if let Ok(value) = api_key_header.to_str() {
            return Ok((value.trim().to_string(), AuthMethod::ApiKey));
        }
    }

    // 3. ?token= query parameter (browsers cannot set headers on WebSocket upgrades)
    if let Ok(Query(TokenQuery { token: Some(token) })) = Query::try_from_uri(&parts.uri) {
        return Ok((token, AuthMethod::QueryToken));
    }

    Err(AuthError::MissingCredentials)
}

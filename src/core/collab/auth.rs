//! Caller identity for the collaboration endpoints
//!
//! The identity of a connection is resolved once, when the HTTP request is
//! upgraded, and is never read from message payloads afterwards:
//!
//! - `Authorization: Bearer <jwt>` header -> authenticated user
//! - `?token=<jwt>` query parameter (browsers cannot set headers on a
//!   WebSocket handshake) -> authenticated user
//! - `X-User-ID` / `X-Username` headers -> guest, only when guests are allowed

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts, Query},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use super::protocol::{ApiError, ApiErrorCode, UserId, UserInfo};
use crate::core::auth::JwtService;

// ============================================================================
// Settings
// ============================================================================

/// How identities are resolved
#[derive(Clone, Default)]
pub struct AuthSettings {
    /// Token validator; without it only guest identities are possible
    pub jwt: Option<Arc<JwtService>>,
    /// Accept identities from the guest headers
    pub allow_guests: bool,
}

impl AuthSettings {
    pub fn new(jwt: Option<Arc<JwtService>>, allow_guests: bool) -> Self {
        Self { jwt, allow_guests }
    }
}

// ============================================================================
// Authentication Types
// ============================================================================

/// Header name for user ID (guest mode)
pub const AUTH_HEADER_USER_ID: &str = "X-User-ID";
/// Header name for username (guest mode)
pub const AUTH_HEADER_USERNAME: &str = "X-Username";

/// User identity extracted from the request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: String,
    pub is_guest: bool,
}

impl AuthenticatedUser {
    pub fn authenticated(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            is_guest: false,
        }
    }

    /// Guest with a name derived from its id
    pub fn guest_with_id(user_id: UserId) -> Self {
        Self {
            user_id,
            username: format!("Guest_{}", &user_id.to_string()[..8]),
            is_guest: true,
        }
    }

    pub fn to_user_info(&self) -> UserInfo {
        UserInfo::new(self.user_id, self.username.clone())
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

// ============================================================================
// Authentication Extractor
// ============================================================================

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AuthSettings: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let settings = AuthSettings::from_ref(state);

        if let Some(token) = bearer_token(parts).or_else(|| query_token(parts)) {
            let Some(jwt) = settings.jwt.as_ref() else {
                return Err(AuthError::unauthorized("Token authentication is not configured"));
            };
            let (user_id, username) = jwt.identify(&token).map_err(|e| {
                tracing::debug!("JWT validation failed: {}", e);
                AuthError::unauthorized("Not authorized, token failed")
            })?;
            return Ok(AuthenticatedUser::authenticated(user_id, username));
        }

        if settings.allow_guests
            && let Some(user_id) = parts
                .headers
                .get(AUTH_HEADER_USER_ID)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
        {
            let username = parts
                .headers
                .get(AUTH_HEADER_USERNAME)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());

            return Ok(match username {
                Some(username) => AuthenticatedUser {
                    user_id,
                    username,
                    is_guest: true,
                },
                None => AuthenticatedUser::guest_with_id(user_id),
            });
        }

        Err(AuthError::unauthorized("Not authorized, no token"))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

// ============================================================================
// Authentication Errors
// ============================================================================

/// Authentication error type
#[derive(Debug)]
pub struct AuthError {
    pub message: String,
    pub status: StatusCode,
}

impl AuthError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ApiError {
            error: self.message,
            code: ApiErrorCode::Unauthorized,
        });

        (self.status, body).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Request authentication.
//!
//! Identity is established outside Linkdrop. The server only maps an opaque
//! token to a user id, read from `Authorization: Bearer <token>` or, for
//! WebSocket handshakes from browsers, a `token` query parameter.

use crate::error::ApiError;
use crate::handlers::AppState;
use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use linkdrop_core::UserId;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a token to the user it identifies.
pub trait Authenticator: Send + Sync {
    /// Return the user for `token`, if it is known.
    fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Static token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    #[must_use]
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// The authenticated user of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
        });

        token
            .and_then(|t| state.auth.authenticate(&t))
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

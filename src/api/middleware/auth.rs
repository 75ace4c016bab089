//! Bearer token authentication
//!
//! Two kinds of credentials reach the API:
//! - the optional admin token guarding viewer/admin routes, also accepted as
//!   `?token=` so browsers can open the stream WebSocket
//! - per-host monitor secrets presented by agents

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Query, Request, State},
    http::{StatusCode, Uri, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

fn bearer(headers: &axum::http::HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidFormat)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Percent-decoded `token` query parameter
fn query_token(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|t| !t.is_empty())
}

/// Admin authentication middleware
///
/// Checks the Bearer token in the Authorization header, falling back to the
/// `token` query parameter.
pub async fn auth_middleware(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = match bearer(request.headers()) {
        Ok(token) => token.to_string(),
        Err(e) => query_token(request.uri()).ok_or(e)?,
    };

    if token != expected_token {
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Monitor secret presented by an agent
#[derive(Debug, Clone)]
pub struct AgentSecret(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AgentSecret
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer(&parts.headers).map(|secret| AgentSecret(secret.to_string()))
    }
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization format (expected: Bearer <token>)",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "Invalid token"),
        };

        (status, message).into_response()
    }
}

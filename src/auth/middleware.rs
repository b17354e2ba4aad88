use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::TokenVerifier;

/// Cookie carrying the access token for browser clients (SSE cannot set headers).
const TOKEN_COOKIE: &str = "access_token";

/// Authenticated caller resolved from `Authorization: Bearer` or the token cookie.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = TokenVerifier::from_ref(state);

        let Some(token) = bearer_token(parts).or_else(|| cookie_token(parts)) else {
            return Err(unauthorized("missing bearer token"));
        };

        verifier
            .verify(&token)
            .map(AuthUser)
            .map_err(|_| unauthorized("invalid or expired token"))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(TOKEN_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(ToString::to_string)
            })
        })
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

//! Authentication middleware.
//!
//! When `AUTH_SECRET` is set every protected route needs
//! `Authorization: Bearer <secret>`. Browsers cannot set headers on a
//! WebSocket upgrade, so a `token` query parameter is accepted as well.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// No secret is configured.
    Anonymous,
    /// The caller presented the configured secret.
    Token,
}

impl AuthUser {
    /// Label recorded as the initiator of runs this caller starts.
    pub fn initiator(&self) -> &'static str {
        match self {
            AuthUser::Anonymous => "http",
            AuthUser::Token => "http:token",
        }
    }
}

fn query_token(parts: &Parts) -> Option<&str> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

/// Compare without returning early on the first differing byte.
fn same_secret(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser::Anonymous);
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) => header.strip_prefix("Bearer ").ok_or((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            ))?,
            None => query_token(parts)
                .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization header"))?,
        };

        if token.is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
        }
        if !same_secret(token, secret) {
            tracing::warn!("Rejected request with invalid bearer token");
            return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
        }

        Ok(AuthUser::Token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn secret_comparison() {
        assert!(same_secret("abc", "abc"));
        assert!(!same_secret("abd", "abc"));
        assert!(!same_secret("ab", "abc"));
    }

    #[test]
    fn token_from_query() {
        let (parts, _) = Request::builder()
            .uri("/events?client=ui&token=s3cret")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(query_token(&parts), Some("s3cret"));

        let (parts, _) = Request::builder().uri("/events").body(()).unwrap().into_parts();
        assert_eq!(query_token(&parts), None);
    }
}

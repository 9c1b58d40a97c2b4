// =============================================================================
// Operator Authentication: bearer token extractor
// =============================================================================
//
// Every route except health takes an `AuthBearer` argument. The presented
// `Authorization: Bearer <token>` is compared in constant time against
// `COUNCIL_ADMIN_TOKEN`, read on each request so the token can be rotated
// without a restart. Failures answer 403 before the handler runs.
// =============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

/// Environment variable holding the operator token.
pub const ADMIN_TOKEN_ENV: &str = "COUNCIL_ADMIN_TOKEN";

const BEARER_PREFIX: &str = "Bearer ";

/// Proof that the request carried the operator token.
#[derive(Debug)]
pub struct AuthBearer;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// The server has no token configured, so nothing can authenticate.
    NotConfigured,
    MissingToken,
    InvalidToken,
}

impl AuthRejection {
    fn message(self) -> &'static str {
        match self {
            Self::NotConfigured => "Server authentication not configured",
            Self::MissingToken => "Missing or malformed bearer token",
            Self::InvalidToken => "Invalid bearer token",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message() });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Check the bearer token in `headers` against `expected`.
pub fn verify_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AuthRejection> {
    if expected.is_empty() {
        return Err(AuthRejection::NotConfigured);
    }
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthRejection::MissingToken)?;

    if tokens_match(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthRejection::InvalidToken)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = std::env::var(ADMIN_TOKEN_ENV).unwrap_or_default();
        verify_bearer(&parts.headers, &expected).map_err(|rejection| {
            warn!(
                path = %parts.uri.path(),
                reason = rejection.message(),
                "Operator request refused"
            );
            rejection
        })?;
        Ok(AuthBearer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match(b"council", b"council"));
        assert!(!tokens_match(b"council", b"counsel"));
        assert!(!tokens_match(b"short", b"longer-token"));
        assert!(!tokens_match(b"\x00", b"\x01"));
    }

    #[test]
    fn accepts_matching_bearer() {
        assert_eq!(verify_bearer(&headers("Bearer s3cret"), "s3cret"), Ok(()));
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        assert_eq!(
            verify_bearer(&headers("Bearer nope"), "s3cret"),
            Err(AuthRejection::InvalidToken)
        );
        assert_eq!(
            verify_bearer(&headers("Basic s3cret"), "s3cret"),
            Err(AuthRejection::MissingToken)
        );
        assert_eq!(
            verify_bearer(&headers("Bearer "), "s3cret"),
            Err(AuthRejection::MissingToken)
        );
        assert_eq!(
            verify_bearer(&HeaderMap::new(), "s3cret"),
            Err(AuthRejection::MissingToken)
        );
    }

    #[test]
    fn unconfigured_server_rejects_everything() {
        assert_eq!(
            verify_bearer(&headers("Bearer "), ""),
            Err(AuthRejection::NotConfigured)
        );
    }

    #[test]
    fn rejection_is_forbidden() {
        let resp = AuthRejection::InvalidToken.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}

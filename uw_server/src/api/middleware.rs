//! Service-token authentication for `/api/v1`.
//!
//! Callers (the checkout orchestrator, admin tooling) present the shared
//! token configured in `LEDGER_API_TOKEN`:
//!
//! ```text
//! Authorization: Bearer <LEDGER_API_TOKEN>
//! ```
//!
//! Both sides are hashed with SHA-256 and the digests compared in constant time.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{ApiError, AppState};
use crate::{logging, metrics};

/// Reject requests without the service bearer token.
///
/// - **Missing or malformed header**: `401 Unauthorized`
/// - **Wrong token**: `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        metrics::auth_failures_total("missing");
        logging::log_security_event("missing_token", &path, "No bearer token presented");
        return unauthorized();
    };

    if !token_matches(token, &state.api_token_digest) {
        metrics::auth_failures_total("invalid");
        logging::log_security_event("invalid_token", &path, "Bearer token mismatch");
        return unauthorized();
    }

    next.run(request).await
}

fn token_matches(presented: &str, expected_digest: &[u8]) -> bool {
    let digest = Sha256::digest(presented.as_bytes());
    digest.as_slice().ct_eq(expected_digest).into()
}

fn unauthorized() -> Response {
    ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        let expected = Sha256::digest(b"correct-token").to_vec();
        assert!(token_matches("correct-token", &expected));
        assert!(!token_matches("correct-tokem", &expected));
        assert!(!token_matches("", &expected));
    }
}

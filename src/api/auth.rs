//! Client API-key gate.
//!
//! When `API_KEY` is configured, gateway routes accept the key either as
//! `Authorization: Bearer <key>` or as `x-api-key: <key>`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::api::handlers::AppState;
use crate::core::error::{AppError, Result};

/// Hash an API key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the presented key; `x-api-key` takes priority.
fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| extract_bearer(headers))
}

/// Extract Bearer token from Authorization header (scheme is case-insensitive).
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Check the presented key against the configured one.
///
/// Always passes when no key is configured.
pub fn verify_api_key(headers: &HeaderMap, configured: Option<&str>) -> Result<()> {
    let Some(configured) = configured else {
        return Ok(());
    };

    let provided = extract_api_key(headers).ok_or(AppError::Unauthorized)?;
    if hash_key(provided) == hash_key(configured) {
        Ok(())
    } else {
        tracing::debug!("Rejected request with invalid API key");
        Err(AppError::Unauthorized)
    }
}

/// Middleware enforcing [`verify_api_key`] on the routes it wraps.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    verify_api_key(request.headers(), state.config.api_key.as_deref())?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_hash_key() {
        let hash = hash_key("sk-test-key-123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_key("sk-test-key-123"));
        assert_ne!(hash, hash_key("different-key"));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(
            extract_bearer(&headers(&[("authorization", "Bearer sk-test")])),
            Some("sk-test")
        );
        assert_eq!(
            extract_bearer(&headers(&[("authorization", "bearer sk-test")])),
            Some("sk-test")
        );
        assert_eq!(
            extract_bearer(&headers(&[("authorization", "Basic dXNlcjpwYXNz")])),
            None
        );
        assert_eq!(extract_bearer(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn test_x_api_key_takes_priority() {
        let headers = headers(&[
            ("authorization", "Bearer from-bearer"),
            ("x-api-key", "from-header"),
        ]);
        assert_eq!(extract_api_key(&headers), Some("from-header"));
    }

    #[test]
    fn test_verify_api_key() {
        assert!(verify_api_key(&HeaderMap::new(), None).is_ok());
        assert!(verify_api_key(&headers(&[("x-api-key", "secret")]), Some("secret")).is_ok());
        assert!(
            verify_api_key(&headers(&[("authorization", "Bearer secret")]), Some("secret")).is_ok()
        );
        assert!(matches!(
            verify_api_key(&headers(&[("x-api-key", "wrong")]), Some("secret")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_api_key(&HeaderMap::new(), Some("secret")),
            Err(AppError::Unauthorized)
        ));
    }
}

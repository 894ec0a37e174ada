//! Authentication middleware
//!
//! Management routes require the admin key from `[server] api_key`, sent
//! as `Authorization: Bearer <key>` or `X-Api-Key: <key>`.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;

const API_KEY_HEADER: &str = "x-api-key";

fn provided_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
    })
}

/// Admin key check
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .config
        .server
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty());

    if validate_api_key(provided_key(request.headers()), expected) {
        Ok(next.run(request).await)
    } else {
        debug!(path = %request.uri().path(), "Rejected request without a valid API key");
        Err(ApiError::AuthFailed)
    }
}

/// No configured key means the API is open
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> bool {
    match (provided, expected) {
        (Some(p), Some(e)) => p == e,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key_no_key_configured() {
        assert!(validate_api_key(None, None));
        assert!(validate_api_key(Some("any"), None));
    }

    #[test]
    fn test_validate_api_key_with_key_configured() {
        assert!(!validate_api_key(None, Some("secret")));
        assert!(!validate_api_key(Some("wrong"), Some("secret")));
        assert!(validate_api_key(Some("secret"), Some("secret")));
    }

    #[test]
    fn test_key_from_either_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(provided_key(&headers), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "xyz".parse().unwrap());
        assert_eq!(provided_key(&headers), Some("xyz"));

        assert_eq!(provided_key(&HeaderMap::new()), None);
    }
}

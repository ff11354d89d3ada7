use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::errors::ServiceError;

/// Header carrying the operator key
pub const ADMIN_KEY_HEADER: &str = "x-api-key";

/// Guards operator endpoints behind the configured admin key.
///
/// With no key configured every admin request is refused.
pub async fn require_admin_key(
    State(expected): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected.filter(|k| !k.is_empty()) else {
        warn!("admin endpoint called but no admin key is configured");
        return ServiceError::Forbidden("admin access is disabled".to_string()).into_response();
    };

    let provided = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            warn!(uri = %request.uri(), "rejected admin request with invalid key");
            ServiceError::Unauthorized("invalid admin key".to_string()).into_response()
        }
        None => ServiceError::Unauthorized("missing admin key".to_string()).into_response(),
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    const KEY: &str = "k3y-for-tests-0123456789abcdefghij";

    fn app(configured: Option<&str>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                configured.map(str::to_string),
                require_admin_key,
            ))
    }

    async fn status_for(configured: Option<&str>, header: Option<&str>) -> StatusCode {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(h) = header {
            builder = builder.header(ADMIN_KEY_HEADER, h);
        }
        app(configured)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn accepts_matching_key() {
        assert_eq!(status_for(Some(KEY), Some(KEY)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_wrong_or_missing_key() {
        assert_eq!(
            status_for(Some(KEY), Some("nope")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(Some(KEY), None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refuses_everything_when_unconfigured() {
        assert_eq!(status_for(None, Some(KEY)).await, StatusCode::FORBIDDEN);
    }
}

use crate::{errors::ServiceError, AppState};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Session claims issued by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Who is calling: a signed-in shopper or a guest.
///
/// A missing `Authorization` header means guest; a present but invalid
/// bearer token is rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<Uuid>,
}

impl CallerIdentity {
    pub fn guest() -> Self {
        Self { user_id: None }
    }
}

pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionClaims, ServiceError> {
    let claims = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => ServiceError::Unauthorized("session expired".into()),
        _ => ServiceError::Unauthorized("invalid session token".into()),
    })?
    .claims;

    Ok(claims)
}

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(CallerIdentity::guest());
        };

        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("expected a Bearer token".into()))?;

        let secret = state
            .config
            .auth_jwt_secret
            .as_deref()
            .ok_or_else(|| ServiceError::Unauthorized("session authentication is not configured".into()))?;

        let claims = verify_session_token(token, secret)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("invalid session subject".into()))?;

        Ok(CallerIdentity {
            user_id: Some(user_id),
        })
    }
}

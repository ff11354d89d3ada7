use crate::handlers::common::{success_response, validate_input};
use crate::{
    entities::coupon_redemption_failure::FailureStatus,
    errors::{ErrorResponse, ServiceError},
    services::coupons::ReconciliationAttempt,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Reconciliation queue endpoints, mounted behind the admin key
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_failures))
        .route("/{id}", get(get_failure))
        .route("/{id}/retry", post(retry_failure))
        .route("/{id}/resolve", post(resolve_failure))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FailureFilter {
    /// `pending` or `resolved`
    pub status: Option<FailureStatus>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResolveFailureRequest {
    #[validate(length(min = 1, max = 1000))]
    pub note: String,
}

/// List parked redemptions
#[utoipa::path(
    get,
    path = "/api/v1/admin/reconciliation",
    summary = "List redemption failures",
    params(FailureFilter),
    responses(
        (status = 200, description = "Failures", body = [Object]),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn list_failures(
    State(state): State<AppState>,
    Query(filter): Query<FailureFilter>,
) -> Result<Response, ServiceError> {
    let failures = state.services.reconciliation.list(filter.status).await?;
    Ok(success_response(failures))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/reconciliation/{id}",
    summary = "Get redemption failure",
    params(("id" = Uuid, Path, description = "Failure id")),
    responses(
        (status = 200, description = "Failure", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn get_failure(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let failure = state.services.reconciliation.get(id).await?;
    Ok(success_response(failure))
}

/// Retry the redemption of a parked failure
#[utoipa::path(
    post,
    path = "/api/v1/admin/reconciliation/{id}/retry",
    summary = "Retry redemption",
    params(("id" = Uuid, Path, description = "Failure id")),
    responses(
        (status = 200, description = "Retry attempted", body = ReconciliationAttempt),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Already resolved", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn retry_failure(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let attempt = state.services.reconciliation.retry(id).await?;
    Ok(success_response(attempt))
}

/// Close a parked failure without redeeming
#[utoipa::path(
    post,
    path = "/api/v1/admin/reconciliation/{id}/resolve",
    summary = "Resolve redemption failure",
    params(("id" = Uuid, Path, description = "Failure id")),
    request_body = ResolveFailureRequest,
    responses(
        (status = 200, description = "Resolved", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Already resolved", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn resolve_failure(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResolveFailureRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let failure = state
        .services
        .reconciliation
        .resolve(id, &payload.note)
        .await?;
    Ok(success_response(failure))
}

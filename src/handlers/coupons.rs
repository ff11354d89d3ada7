use crate::handlers::common::{created_response, success_response, validate_input, CallerIdentity};
use crate::{
    errors::{ErrorResponse, ServiceError},
    services::coupons::{
        AppliedCoupon, CartLine, CouponDetails, CouponValidation, CreateCouponRequest,
        UpdateCouponRequest,
    },
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Public coupon endpoints
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_coupon))
}

/// Operator coupon endpoints, mounted behind the admin key
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/{id}", get(get_coupon).patch(update_coupon))
        .route("/{id}/usages", get(list_coupon_usages))
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    /// Cart total in minor currency units
    #[validate(range(min = 0))]
    pub total_amount: i64,
    #[validate]
    pub cart_items: Option<Vec<CartLine>>,
}

/// `{valid: true, coupon}` or `{valid: false, error}`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidateCouponResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<AppliedCoupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidateCouponResponse {
    fn valid(coupon: AppliedCoupon) -> Self {
        Self {
            valid: true,
            coupon: Some(coupon),
            error: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            coupon: None,
            error: Some(error.into()),
        }
    }
}

fn invalid_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ValidateCouponResponse::invalid(error))).into_response()
}

/// Validate a coupon against a cart
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Validate coupon",
    description = "Checks whether a coupon applies to the cart and prices the discount. Never consumes a use.",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = ValidateCouponResponse),
        (status = 400, description = "Coupon rejected or invalid request", body = ValidateCouponResponse),
        (status = 401, description = "Invalid session token", body = ErrorResponse),
        (status = 404, description = "Unknown coupon code", body = ValidateCouponResponse),
        (status = 422, description = "Coupon misconfigured", body = ValidateCouponResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    caller: CallerIdentity,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return Ok(invalid_response(StatusCode::BAD_REQUEST, rejection.body_text()));
        }
    };
    if let Err(e) = validate_input(&payload) {
        return Ok(invalid_response(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let outcome = state
        .services
        .coupon_validator
        .validate(
            &payload.code,
            payload.total_amount,
            caller.user_id,
            payload.cart_items.as_deref(),
        )
        .await;

    match outcome {
        Ok(CouponValidation::Valid(applied)) => Ok(success_response(
            ValidateCouponResponse::valid(applied),
        )),
        Ok(CouponValidation::Rejected(rejection)) => {
            Ok(invalid_response(rejection.status_code(), rejection.reason()))
        }
        Err(e) if !e.is_infrastructure() => Ok(invalid_response(e.status_code(), e.response_message())),
        Err(e) => Err(e),
    }
}

/// List all coupons
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons",
    summary = "List coupons",
    responses(
        (status = 200, description = "Coupons", body = [Object]),
        (status = 401, description = "Missing or wrong admin key", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn list_coupons(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let coupons = state.services.coupon_management.list().await?;
    Ok(success_response(coupons))
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons",
    summary = "Create coupon",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = CouponDetails),
        (status = 400, description = "Invalid coupon definition", body = ErrorResponse),
        (status = 409, description = "Code already exists", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let coupon = state.services.coupon_management.create(payload).await?;
    Ok(created_response(coupon))
}

/// Get one coupon with its category restrictions
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons/{id}",
    summary = "Get coupon",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon", body = CouponDetails),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let coupon = state.services.coupon_management.get(id).await?;
    Ok(success_response(coupon))
}

/// Update a coupon
#[utoipa::path(
    patch,
    path = "/api/v1/admin/coupons/{id}",
    summary = "Update coupon",
    description = "Partial update. Lowering max_uses below current_uses is rejected.",
    params(("id" = Uuid, Path, description = "Coupon id")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Updated coupon", body = CouponDetails),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let coupon = state.services.coupon_management.update(id, payload).await?;
    Ok(success_response(coupon))
}

/// Redemption ledger for a coupon
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons/{id}/usages",
    summary = "List coupon usages",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Usage records", body = [Object]),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "admin"
)]
pub async fn list_coupon_usages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let usages = state.services.coupon_management.list_usages(id).await?;
    Ok(success_response(usages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_response_omits_coupon() {
        let body = serde_json::to_value(ValidateCouponResponse::invalid("expired")).unwrap();
        assert_eq!(body, serde_json::json!({"valid": false, "error": "expired"}));
    }

    #[test]
    fn request_uses_camel_case_fields() {
        let request: ValidateCouponRequest = serde_json::from_value(serde_json::json!({
            "code": "summer10",
            "totalAmount": 5000,
            "cartItems": [{
                "product": {
                    "id": Uuid::nil(),
                    "category_id": Uuid::nil(),
                    "price": 2500
                },
                "quantity": 2
            }]
        }))
        .unwrap();
        assert_eq!(request.total_amount, 5000);
        assert_eq!(request.cart_items.map(|items| items.len()), Some(1));
    }
}

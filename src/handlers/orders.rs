use crate::handlers::common::{created_response, success_response, validate_input, CallerIdentity};
use crate::{
    errors::{ErrorResponse, ServiceError},
    services::orders::{CreateOrderRequest, OrderResponse},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/{id}", get(get_order))
}

/// Create an order awaiting payment
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Creates an order in awaiting_payment. A coupon code is validated and priced; a rejected coupon fails the request.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request or coupon rejected", body = ErrorResponse),
        (status = 401, description = "Invalid session token", body = ErrorResponse),
        (status = 404, description = "Unknown coupon code", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .create_order(payload, caller.user_id)
        .await?;
    Ok(created_response(order))
}

/// Fetch an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = OrderResponse),
        (status = 401, description = "Order belongs to a signed-in user", body = ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    if let Some(owner) = order.user_id {
        match caller.user_id {
            None => {
                return Err(ServiceError::Unauthorized(
                    "sign in to view this order".into(),
                ))
            }
            Some(caller_id) if caller_id != owner => {
                return Err(ServiceError::Forbidden(format!(
                    "Order {} belongs to another user",
                    id
                )))
            }
            Some(_) => {}
        }
    }
    Ok(success_response(order))
}

use axum::Json;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ÉCLAT Beauty Storefront API",
        version = "1.0.0",
        description = r#"
# ÉCLAT Beauty Storefront API

Coupon validation, order creation and payment confirmation for the storefront.

## Money

All amounts are integers in minor currency units (cents).

## Authentication

Shopper endpoints accept an optional session token:

```
Authorization: Bearer <session-jwt>
```

Admin endpoints require the operator key in `X-API-Key`.

## Coupon validation

`POST /api/v1/coupons/validate` answers `{"valid": true, "coupon": {...}}` or
`{"valid": false, "error": "<reason>"}` with a 4xx status. Validation never
consumes a use; redemption happens once per order after payment.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "coupons", description = "Coupon validation"),
        (name = "orders", description = "Order checkout endpoints"),
        (name = "payments", description = "Payment processor webhooks"),
        (name = "admin", description = "Coupon administration and redemption reconciliation")
    ),
    paths(
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::list_coupon_usages,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::reconciliation::list_failures,
        crate::handlers::reconciliation::get_failure,
        crate::handlers::reconciliation::retry_failure,
        crate::handlers::reconciliation::resolve_failure,
    ),
    components(
        schemas(
            // Coupon types
            crate::handlers::coupons::ValidateCouponRequest,
            crate::handlers::coupons::ValidateCouponResponse,
            crate::services::coupons::AppliedCoupon,
            crate::services::coupons::CartLine,
            crate::services::coupons::CartProduct,
            crate::services::coupons::CouponRejection,
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::UpdateCouponRequest,
            crate::services::coupons::CouponDetails,
            crate::entities::coupon::DiscountType,

            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::PaymentConfirmation,
            crate::entities::order::OrderStatus,

            // Reconciliation types
            crate::services::coupons::ReconciliationAttempt,
            crate::services::coupons::RedemptionSummary,
            crate::handlers::reconciliation::ResolveFailureRequest,
            crate::entities::coupon_redemption_failure::FailureStatus,

            // Common types
            crate::ResponseMeta,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
        );
    }
}

/// Serves the generated OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_coupon_paths_and_security() {
        let doc = ApiDocV1::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/coupons/validate"));
        assert!(doc.paths.paths.contains_key("/api/v1/payments/webhook"));
        assert!(!doc
            .paths
            .paths
            .keys()
            .any(|path| path.contains("redeem")));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("api_key"));
        assert!(components.schemas.contains_key("ValidateCouponResponse"));
    }
}

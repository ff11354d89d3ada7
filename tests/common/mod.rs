#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use eclat_storefront::{
    app_router,
    config::AppConfig,
    db,
    entities::coupon::DiscountType,
    events,
    handlers::{common::SessionClaims, payment_webhooks::sign_payload, AppServices},
    services::coupons::{CartLine, CartProduct, CouponDetails, CreateCouponRequest},
    services::orders::{CreateOrderRequest, OrderResponse},
    AppState,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_KEY: &str = "admin-key-for-integration-tests-0123456789";
pub const JWT_SECRET: &str = "jwt-secret-for-integration-tests";
pub const WEBHOOK_SECRET: &str = "whsec_integration_tests";

/// Application backed by a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "development".to_string(),
        );
        // every pooled connection to sqlite::memory: is its own database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.auto_migrate = true;
        cfg.admin_api_key = Some(ADMIN_KEY.to_string());
        cfg.auth_jwt_secret = Some(JWT_SECRET.to_string());
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect to in-memory database");
        db::run_migrations(&pool).await.expect("run migrations");
        let db_arc = Arc::new(pool);

        let (sender, rx) = events::channel();
        let event_task = tokio::spawn(events::process_events(rx));
        let event_sender = Arc::new(sender);

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            cfg.default_currency.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender: (*event_sender).clone(),
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            _event_task: event_task,
        }
    }

    /// Sends a JSON request through the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    pub async fn admin_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, &[("x-api-key", ADMIN_KEY)])
            .await
    }

    /// Posts raw bytes with the given headers.
    pub async fn request_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Posts a signed payment webhook, as the processor would.
    pub async fn payment_webhook(&self, payload: Value) -> axum::response::Response {
        let body = serde_json::to_vec(&payload).expect("serialize webhook");
        let ts = Utc::now().timestamp();
        let signature = sign_payload(WEBHOOK_SECRET, ts, &body);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("x-timestamp", ts.to_string())
            .header("x-signature", signature)
            .body(Body::from(body))
            .expect("build webhook request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook")
    }

    pub async fn pay(&self, order_id: Uuid, reference: &str) -> axum::response::Response {
        self.payment_webhook(serde_json::json!({
            "id": format!("evt_{}", reference),
            "type": "payment.succeeded",
            "data": { "order_id": order_id, "payment_reference": reference }
        }))
        .await
    }

    pub async fn create_coupon(&self, request: CreateCouponRequest) -> CouponDetails {
        self.state
            .services
            .coupon_management
            .create(request)
            .await
            .expect("seed coupon")
    }

    pub async fn create_order(
        &self,
        total_amount: i64,
        coupon_code: Option<&str>,
        user_id: Option<Uuid>,
    ) -> OrderResponse {
        self.state
            .services
            .orders
            .create_order(
                CreateOrderRequest {
                    guest_email: user_id.is_none().then(|| "guest@example.com".to_string()),
                    total_amount,
                    currency: None,
                    coupon_code: coupon_code.map(str::to_string),
                    cart_items: None,
                },
                user_id,
            )
            .await
            .expect("seed order")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Coupon definition with everything optional left open.
pub fn coupon_request(code: &str, discount_type: DiscountType, value: i64) -> CreateCouponRequest {
    CreateCouponRequest {
        code: code.to_string(),
        description: None,
        discount_type,
        discount_value: value,
        max_discount_amount: None,
        min_purchase_amount: 0,
        max_uses: None,
        once_per_user: false,
        is_active: true,
        valid_from: None,
        valid_until: None,
        category_ids: Vec::new(),
    }
}

pub fn cart_line(category_id: Uuid, price: i64, quantity: i64) -> CartLine {
    CartLine {
        product: CartProduct {
            id: Uuid::new_v4(),
            category_id,
            price,
        },
        quantity,
    }
}

/// Session token for `user_id`, signed the way the auth provider signs them.
pub fn session_token(user_id: Uuid) -> String {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        email: Some("shopper@example.com".into()),
        role: Some("authenticated".into()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode session token")
}

pub async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("response body is json")
    };
    (status, json)
}

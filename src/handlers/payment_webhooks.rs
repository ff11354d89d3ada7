use crate::middleware_helpers::admin_key::constant_time_eq;
use crate::services::orders::PaymentConfirmation;
use crate::{errors::ServiceError, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

/// Envelope of a payment processor notification
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct PaymentSucceededData {
    order_id: Uuid,
    #[serde(default, alias = "payment_intent")]
    payment_reference: Option<String>,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order cannot be paid", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    match state.config.payment_webhook_secret.as_deref() {
        Some(secret) => {
            if !verify_signature(
                &headers,
                &body,
                secret,
                state.config.payment_webhook_tolerance_secs,
            ) {
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }
        None => warn!("payment webhook secret not configured; accepting unsigned webhook"),
    }

    let event: PaymentWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    if event.event_type != PAYMENT_SUCCEEDED {
        info!("Unhandled payment webhook type: {}", event.event_type);
        return Ok(Json(json!({ "received": true })));
    }

    let data: PaymentSucceededData = serde_json::from_value(event.data)
        .map_err(|e| ServiceError::BadRequest(format!("invalid payment data: {}", e)))?;
    let payment_reference = data
        .payment_reference
        .or(event.id)
        .ok_or_else(|| ServiceError::BadRequest("missing payment reference".to_string()))?;

    let PaymentConfirmation {
        order,
        transitioned,
        redemption,
    } = state
        .services
        .orders
        .confirm_payment(data.order_id, &payment_reference)
        .await?;

    Ok(Json(json!({
        "received": true,
        "order_id": order.id,
        "status": order.status,
        "transitioned": transitioned,
        "redemption": redemption,
    })))
}

fn expected_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn within_tolerance(timestamp: &str, tolerance_secs: u64) -> bool {
    match timestamp.parse::<i64>() {
        Ok(ts) => (chrono::Utc::now().timestamp() - ts).unsigned_abs() <= tolerance_secs,
        Err(_) => false,
    }
}

/// Accepts `x-timestamp` + `x-signature`, or `Stripe-Signature: t=..,v1=..`.
/// Both sign `"{timestamp}.{body}"` with HMAC-SHA256, hex encoded.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let check = |ts: &str, sig: &str| {
        within_tolerance(ts, tolerance_secs)
            && expected_signature(secret, ts, payload)
                .map(|expected| constant_time_eq(expected.as_bytes(), sig.as_bytes()))
                .unwrap_or(false)
    };

    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            return check(ts, sig);
        }
    }

    if let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = val,
                Some(("v1", val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            return check(ts, v1);
        }
    }

    false
}

/// Signs a payload the way the payment processor does; used by tests and
/// local tooling.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    expected_signature(secret, &timestamp.to_string(), payload).unwrap_or_default()
}

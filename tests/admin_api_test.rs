mod common;

use axum::http::{Method, StatusCode};
use common::{coupon_request, response_json, session_token, TestApp};
use eclat_storefront::entities::{
    coupon::DiscountType, coupon_redemption_failure::FailureStatus, order, Order,
};
use eclat_storefront::services::coupons::RedeemCoupon;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use uuid::Uuid;

fn new_coupon_body(code: &str) -> serde_json::Value {
    json!({
        "code": code,
        "description": "Autumn skincare week",
        "discount_type": "percentage",
        "discount_value": 25,
        "max_discount_amount": 2000,
        "max_uses": 100,
        "category_ids": [Uuid::new_v4()]
    })
}

#[tokio::test]
async fn admin_endpoints_require_the_operator_key() {
    let app = TestApp::new().await;

    let (status, _) = response_json(
        app.request(Method::GET, "/api/v1/admin/coupons", None, &[])
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = response_json(
        app.request(
            Method::GET,
            "/api/v1/admin/reconciliation",
            None,
            &[("x-api-key", "definitely-not-the-configured-admin-key")],
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = response_json(
        app.admin_request(Method::GET, "/api/v1/admin/coupons", None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn coupons_are_created_normalized_and_unique() {
    let app = TestApp::new().await;

    let (status, body) = response_json(
        app.admin_request(
            Method::POST,
            "/api/v1/admin/coupons",
            Some(new_coupon_body("autumn25")),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["coupon"]["code"], "AUTUMN25");
    assert_eq!(body["coupon"]["current_uses"], 0);
    assert_eq!(body["category_ids"].as_array().unwrap().len(), 1);
    let id = body["coupon"]["id"].as_str().unwrap().to_string();

    let (status, _) = response_json(
        app.admin_request(
            Method::POST,
            "/api/v1/admin/coupons",
            Some(new_coupon_body("AUTUMN25")),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = response_json(
        app.admin_request(Method::GET, &format!("/api/v1/admin/coupons/{id}"), None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["coupon"]["max_discount_amount"], 2000);
}

#[tokio::test]
async fn invalid_coupon_definitions_are_rejected() {
    let app = TestApp::new().await;

    let mut over_hundred = new_coupon_body("TOOMUCH");
    over_hundred["discount_value"] = json!(150);
    let (status, _) = response_json(
        app.admin_request(Method::POST, "/api/v1/admin/coupons", Some(over_hundred))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut zero = new_coupon_body("ZERO");
    zero["discount_value"] = json!(0);
    let (status, _) = response_json(
        app.admin_request(Method::POST, "/api/v1/admin/coupons", Some(zero))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn max_uses_cannot_drop_below_current_uses() {
    let app = TestApp::new().await;
    let mut request = coupon_request("CAPPED", DiscountType::Fixed, 100);
    request.max_uses = Some(3);
    let coupon_id = app.create_coupon(request).await.coupon.id;

    for _ in 0..2 {
        let order = app.create_order(1000, Some("CAPPED"), None).await;
        app.state
            .services
            .coupon_redemption
            .redeem(RedeemCoupon {
                coupon_id,
                order_id: order.id,
                user_id: None,
                discount_applied: 100,
            })
            .await
            .unwrap();
    }

    let uri = format!("/api/v1/admin/coupons/{coupon_id}");
    let (status, _) = response_json(
        app.admin_request(Method::PATCH, &uri, Some(json!({ "max_uses": 1 })))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = response_json(
        app.admin_request(Method::PATCH, &uri, Some(json!({ "remove_usage_limit": true })))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["coupon"]["max_uses"].is_null());

    let (status, usages) = response_json(
        app.admin_request(Method::GET, &format!("{uri}/usages"), None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usages.as_array().unwrap().len(), 2);

    let (status, _) = response_json(
        app.admin_request(
            Method::GET,
            &format!("/api/v1/admin/coupons/{}/usages", Uuid::new_v4()),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn parked_failure_can_be_written_off_once() {
    let app = TestApp::new().await;
    let mut request = coupon_request("SOLDOUT", DiscountType::Fixed, 300);
    request.max_uses = Some(1);
    app.create_coupon(request).await;

    let first = app.create_order(3000, Some("SOLDOUT"), None).await;
    let second = app.create_order(3000, Some("SOLDOUT"), None).await;
    app.pay(first.id, "pi_a").await;
    app.pay(second.id, "pi_b").await;

    let failures = app
        .state
        .services
        .reconciliation
        .list(None)
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    let failure_id = failures[0].id;

    // still exhausted, so a retry only counts another attempt
    let (status, body) = response_json(
        app.admin_request(
            Method::POST,
            &format!("/api/v1/admin/reconciliation/{failure_id}/retry"),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redemption"]["success"], false);
    assert_eq!(body["failure"]["attempts"], 2);
    assert_eq!(body["failure"]["status"], "pending");

    let resolve_uri = format!("/api/v1/admin/reconciliation/{failure_id}/resolve");
    let (status, body) = response_json(
        app.admin_request(
            Method::POST,
            &resolve_uri,
            Some(json!({ "note": "discount honoured manually" })),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["resolution_note"], "discount honoured manually");

    let (status, _) = response_json(
        app.admin_request(Method::POST, &resolve_uri, Some(json!({ "note": "again" })))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(
        app.state.services.reconciliation.pending_count().await.unwrap(),
        0
    );
}

#[tokio::test]
async fn sweep_queues_paid_orders_missing_their_redemption() {
    let app = TestApp::new().await;
    app.create_coupon(coupon_request("SWEEP", DiscountType::Fixed, 200))
        .await;
    let order = app.create_order(2000, Some("SWEEP"), None).await;

    // payment recorded but the process died before redeeming
    let model = Order::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: order::ActiveModel = model.into();
    active.status = Set(order::OrderStatus::Paid);
    active.update(&*app.state.db).await.unwrap();

    let reconciliation = &app.state.services.reconciliation;
    assert_eq!(reconciliation.sweep_missing_redemptions().await.unwrap(), 1);
    assert_eq!(reconciliation.sweep_missing_redemptions().await.unwrap(), 0);

    let (attempted, resolved) = reconciliation.retry_pending().await.unwrap();
    assert_eq!((attempted, resolved), (1, 1));
    assert_eq!(reconciliation.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_batch_continues_past_a_failing_row() {
    let app = TestApp::new().await;
    let coupon_id = app
        .create_coupon(coupon_request("BATCH", DiscountType::Fixed, 200))
        .await
        .coupon
        .id;
    let order = app.create_order(2000, Some("BATCH"), None).await;
    let reconciliation = &app.state.services.reconciliation;

    // a row the redemption service refuses outright
    let broken = reconciliation
        .record_failure(
            &RedeemCoupon {
                coupon_id,
                order_id: Uuid::new_v4(),
                user_id: None,
                discount_applied: -5,
            },
            "imported from legacy ledger",
        )
        .await
        .unwrap();
    reconciliation
        .record_failure(
            &RedeemCoupon {
                coupon_id,
                order_id: order.id,
                user_id: None,
                discount_applied: 200,
            },
            "database unavailable",
        )
        .await
        .unwrap();

    let (attempted, resolved) = reconciliation.retry_pending().await.unwrap();
    assert_eq!((attempted, resolved), (2, 1));

    let broken = reconciliation.get(broken.id).await.unwrap();
    assert_eq!(broken.attempts, 2);
    assert_eq!(broken.status, FailureStatus::Pending);
    assert_eq!(reconciliation.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn orders_are_created_over_http_and_scoped_to_their_owner() {
    let app = TestApp::new().await;
    app.create_coupon(coupon_request("TENOFF", DiscountType::Fixed, 1000))
        .await;

    let (status, _) = response_json(
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "totalAmount": 5000 })),
            &[],
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "guest without email");

    let owner = format!("Bearer {}", session_token(Uuid::new_v4()));
    let (status, order) = response_json(
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "totalAmount": 5000, "couponCode": "tenoff" })),
            &[("authorization", owner.as_str())],
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "awaiting_payment");
    assert_eq!(order["discount_amount"], 1000);
    assert_eq!(order["amount_due"], 4000);
    assert_eq!(order["currency"], "EUR");

    let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());
    let (status, _) = response_json(
        app.request(Method::GET, &uri, None, &[("authorization", owner.as_str())])
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stranger = format!("Bearer {}", session_token(Uuid::new_v4()));
    let (status, _) = response_json(
        app.request(Method::GET, &uri, None, &[("authorization", stranger.as_str())])
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = response_json(app.request(Method::GET, &uri, None, &[]).await).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "anonymous read of a user's order");

    let (status, body) = response_json(
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "totalAmount": 500,
                "guestEmail": "guest@example.com",
                "couponCode": "NOSUCH"
            })),
            &[],
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"], "code_not_found");
}

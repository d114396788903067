//! Integration tests for plan payments and webhook reconciliation: free plan
//! shortcut, charge creation against a mocked gateway, webhook auth and the
//! subscription state machine.

mod common;

use axum::http::Method;
use common::{response_json, TestApp, WEBHOOK_TOKEN};
use marketplace_settlement_api::entities::subscription;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_URI: &str = "/api/v1/payments/webhook";
const TOKEN_HEADER: &str = "asaas-access-token";

async fn seller_on_plan(app: &TestApp, plan_price: rust_decimal::Decimal) -> SellerFixture {
    let owner = app.seed_user("seller@example.com").await;
    let starter = app.seed_plan("Starter", dec!(0), 3).await;
    let seller = app.seed_seller(&owner, &starter).await;
    let target = app.seed_plan("Premium", plan_price, -1).await;
    let token = app.token_for(&owner);
    SellerFixture {
        owner_id: owner.id,
        seller_id: seller.id,
        starter_plan_id: starter.id,
        target_plan_id: target.id,
        token,
    }
}

struct SellerFixture {
    owner_id: String,
    seller_id: String,
    starter_plan_id: String,
    target_plan_id: String,
    token: String,
}

#[tokio::test]
async fn free_plan_activates_without_touching_the_gateway() {
    // Gateway deliberately unconfigured; a free plan must not need it.
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(0)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
            Some(&fx.token),
        )
        .await;

    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["data"]["kind"], "free_plan_activated");

    let subscription_id = body["data"]["subscription_id"].as_str().unwrap();
    let sub = app.reload_subscription(subscription_id).await;
    assert_eq!(sub.status, "ACTIVE");
    assert!(sub.started_at.is_some());
    assert_eq!(
        app.reload_seller(&fx.seller_id).await.plan_id,
        fx.target_plan_id
    );
}

#[tokio::test]
async fn paid_plan_creates_a_charge_and_a_pending_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_001",
            "name": "seller",
            "email": "seller@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_001",
            "status": "PENDING",
            "value": 49.90,
            "dueDate": "2026-09-04",
            "invoiceUrl": "https://gateway.test/i/pay_001"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_001/pixQrCode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "encodedImage": "aGVsbG8=",
            "payload": "00020126pix-copy-paste"
        })))
        .mount(&server)
        .await;

    let app = TestApp::with_gateway(Some(&server.uri())).await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
            Some(&fx.token),
        )
        .await;

    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let data = &body["data"];
    assert_eq!(data["kind"], "charge_created");
    assert_eq!(data["charge_id"], "pay_001");
    assert_eq!(data["status"], "pending");
    assert_eq!(data["customer_resolution"], "created");
    assert_eq!(data["pix_qr_code"]["payload"], "00020126pix-copy-paste");

    let payment = app
        .reload_payment(data["payment_id"].as_str().unwrap())
        .await;
    assert_eq!(payment.gateway_charge_id, "pay_001");
    assert_eq!(payment.status, "pending");
    let sub = app
        .reload_subscription(payment.subscription_id.as_deref().unwrap())
        .await;
    assert_eq!(sub.status, "PENDING");
    assert!(sub.started_at.is_none());

    // The seller keeps the old plan until the charge is paid.
    assert_eq!(
        app.reload_seller(&fx.seller_id).await.plan_id,
        fx.starter_plan_id
    );
}

#[tokio::test]
async fn rejected_customer_registration_recovers_by_email_search() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "errors": [{ "code": "invalid_cpfCnpj" }] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "cus_existing",
                "name": "seller",
                "email": "seller@example.com"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_002",
            "status": "PENDING",
            "value": 49.90
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_002/pixQrCode"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
        .mount(&server)
        .await;

    let app = TestApp::with_gateway(Some(&server.uri())).await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
            Some(&fx.token),
        )
        .await;

    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["data"]["customer_resolution"], "recovered");
    assert_eq!(body["data"]["pix_qr_code"], serde_json::Value::Null);
}

#[tokio::test]
async fn non_sellers_cannot_purchase_plans() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com").await;
    let plan = app.seed_plan("Premium", dec!(49.90), -1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": plan.id, "payment_method": "PIX" })),
            Some(&app.token_for(&buyer)),
        )
        .await;

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn webhook_rejects_a_bad_token() {
    let app = TestApp::new().await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_CONFIRMED",
                "payment": { "id": "pay_404" }
            })),
            &[(TOKEN_HEADER, "wrong_token")],
        )
        .await;

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn webhook_for_an_unknown_charge_is_acknowledged() {
    let app = TestApp::new().await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_CONFIRMED",
                "payment": { "id": "pay_never_seen" }
            })),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;

    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn confirmed_payment_activates_the_subscription_and_retires_the_old_one() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    let old_sub = app
        .seed_subscription(&fx.seller_id, &fx.starter_plan_id, "ACTIVE")
        .await;
    let new_sub = app
        .seed_subscription(&fx.seller_id, &fx.target_plan_id, "PENDING")
        .await;
    let payment = app
        .seed_payment(
            &fx.owner_id,
            "pay_100",
            dec!(49.90),
            "pending",
            None,
            Some(new_sub.id.clone()),
        )
        .await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_CONFIRMED",
                "payment": { "id": "pay_100", "status": "CONFIRMED" }
            })),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(app.reload_payment(&payment.id).await.status, "paid");

    let activated = app.reload_subscription(&new_sub.id).await;
    assert_eq!(activated.status, "ACTIVE");
    assert!(activated.started_at.is_some());
    assert_eq!(app.reload_subscription(&old_sub.id).await.status, "CANCELLED");
    assert_eq!(
        app.reload_seller(&fx.seller_id).await.plan_id,
        fx.target_plan_id
    );
}

#[tokio::test]
async fn replayed_webhook_deliveries_are_no_ops() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;
    let sub = app
        .seed_subscription(&fx.seller_id, &fx.target_plan_id, "PENDING")
        .await;
    let payment = app
        .seed_payment(
            &fx.owner_id,
            "pay_200",
            dec!(49.90),
            "pending",
            None,
            Some(sub.id.clone()),
        )
        .await;

    let payload = json!({
        "event": "PAYMENT_RECEIVED",
        "payment": { "id": "pay_200", "status": "RECEIVED" }
    });

    let first = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(payload.clone()),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;
    assert_eq!(first.status(), 200);
    let started_at = app.reload_subscription(&sub.id).await.started_at;

    let second = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(payload),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;
    assert_eq!(second.status(), 200);

    let after = app.reload_subscription(&sub.id).await;
    assert_eq!(after.status, "ACTIVE");
    assert_eq!(after.started_at, started_at);
    assert_eq!(app.reload_payment(&payment.id).await.status, "paid");
}

#[tokio::test]
async fn refund_cancels_the_linked_subscription() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;
    let sub = app
        .seed_subscription(&fx.seller_id, &fx.target_plan_id, "ACTIVE")
        .await;
    let payment = app
        .seed_payment(
            &fx.owner_id,
            "pay_300",
            dec!(49.90),
            "paid",
            None,
            Some(sub.id.clone()),
        )
        .await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_REFUNDED",
                "payment": { "id": "pay_300", "status": "REFUNDED" }
            })),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(app.reload_payment(&payment.id).await.status, "refunded");
    assert_eq!(app.reload_subscription(&sub.id).await.status, "CANCELLED");
}

#[tokio::test]
async fn confirmed_payment_marks_the_linked_order_paid() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com").await;
    let plan = app.seed_plan("Basic", dec!(0), 3).await;
    let owner = app.seed_user("seller@example.com").await;
    let seller = app.seed_seller(&owner, &plan).await;
    let order = app.seed_order(&buyer.id, &seller.id, dec!(80)).await;
    app.seed_payment(
        &buyer.id,
        "pay_400",
        dec!(80),
        "pending",
        Some(order.id.clone()),
        None,
    )
    .await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_CONFIRMED",
                "payment": { "id": "pay_400", "status": "CONFIRMED" }
            })),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(app.reload_order(&order.id).await.payment_status, "paid");
}

#[tokio::test]
async fn missing_status_falls_back_to_the_event_name() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;
    let sub = app
        .seed_subscription(&fx.seller_id, &fx.target_plan_id, "PENDING")
        .await;
    let payment = app
        .seed_payment(
            &fx.owner_id,
            "pay_500",
            dec!(49.90),
            "pending",
            None,
            Some(sub.id.clone()),
        )
        .await;

    let response = app
        .request_with_headers(
            Method::POST,
            WEBHOOK_URI,
            Some(json!({
                "event": "PAYMENT_CONFIRMED",
                "payment": { "id": "pay_500" }
            })),
            &[(TOKEN_HEADER, WEBHOOK_TOKEN)],
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(app.reload_payment(&payment.id).await.status, "paid");
}

#[tokio::test]
async fn get_payment_serves_local_state_when_the_gateway_is_down() {
    // No gateway api key configured, so reconciliation degrades gracefully.
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com").await;
    let payment = app
        .seed_payment(&buyer.id, "pay_600", dec!(25), "pending", None, None)
        .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/{}", payment.id),
            None,
            Some(&app.token_for(&buyer)),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn payments_are_only_visible_to_their_owner() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com").await;
    let snoop = app.seed_user("snoop@example.com").await;
    let payment = app
        .seed_payment(&owner.id, "pay_700", dec!(25), "pending", None, None)
        .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/{}", payment.id),
            None,
            Some(&app.token_for(&snoop)),
        )
        .await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn free_plan_purchase_retires_previous_active_subscriptions() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(0)).await;
    let old_sub = app
        .seed_subscription(&fx.seller_id, &fx.starter_plan_id, "ACTIVE")
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
            Some(&fx.token),
        )
        .await;

    assert_eq!(response.status(), 201);
    assert_eq!(app.reload_subscription(&old_sub.id).await.status, "CANCELLED");

    let active = subscription::Entity::find()
        .filter(subscription::Column::SellerId.eq(fx.seller_id.clone()))
        .filter(subscription::Column::Status.eq("ACTIVE"))
        .all(&*app.state.db)
        .await
        .expect("query subscriptions");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].plan_id, fx.target_plan_id);
}

#[tokio::test]
async fn missing_payment_method_is_rejected() {
    let app = TestApp::new().await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id })),
            Some(&fx.token),
        )
        .await;

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn failed_charge_leaves_no_subscription_behind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_010",
            "name": "seller",
            "email": "seller@example.com"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    let app = TestApp::with_gateway(Some(&server.uri())).await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create",
            Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
            Some(&fx.token),
        )
        .await;
    assert_eq!(response.status(), 500);

    let subs = subscription::Entity::find()
        .filter(subscription::Column::SellerId.eq(fx.seller_id.clone()))
        .all(&*app.state.db)
        .await
        .expect("query subscriptions");
    assert!(subs.is_empty());
}

#[tokio::test]
async fn repeat_purchase_supersedes_the_earlier_pending_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_011",
            "name": "seller",
            "email": "seller@example.com"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_010",
            "status": "PENDING",
            "value": 49.90
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_011",
            "status": "PENDING",
            "value": 49.90
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_010/pixQrCode"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_011/pixQrCode"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
        .mount(&server)
        .await;

    let app = TestApp::with_gateway(Some(&server.uri())).await;
    let fx = seller_on_plan(&app, dec!(49.90)).await;

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/payments/create",
                Some(json!({ "plan_id": fx.target_plan_id, "payment_method": "PIX" })),
                Some(&fx.token),
            )
            .await;
        assert_eq!(response.status(), 201);
    }

    let pending = subscription::Entity::find()
        .filter(subscription::Column::SellerId.eq(fx.seller_id.clone()))
        .filter(subscription::Column::Status.eq("PENDING"))
        .all(&*app.state.db)
        .await
        .expect("query subscriptions");
    assert_eq!(pending.len(), 1);

    let cancelled = subscription::Entity::find()
        .filter(subscription::Column::SellerId.eq(fx.seller_id.clone()))
        .filter(subscription::Column::Status.eq("CANCELLED"))
        .all(&*app.state.db)
        .await
        .expect("query subscriptions");
    assert_eq!(cancelled.len(), 1);
}

#[tokio::test]
async fn foreign_payment_lookups_never_touch_the_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/pay_900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_900",
            "status": "CONFIRMED",
            "value": 49.90
        })))
        .expect(0)
        .mount(&server)
        .await;

    let app = TestApp::with_gateway(Some(&server.uri())).await;
    let owner = app.seed_user("owner@example.com").await;
    let payment = app
        .seed_payment(&owner.id, "pay_900", dec!(49.90), "pending", None, None)
        .await;
    let snoop = app.seed_user("snoop@example.com").await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/{}", payment.id),
            None,
            Some(&app.token_for(&snoop)),
        )
        .await;

    assert_eq!(response.status(), 404);
    assert_eq!(app.reload_payment(&payment.id).await.status, "pending");
}

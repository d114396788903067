//! Integration tests for product creation under plan quotas.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

async fn create_product(app: &TestApp, token: &str, name: &str) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/v1/products",
        Some(json!({ "name": name, "price": "19.90", "stock": 5 })),
        Some(token),
    )
    .await
}

#[tokio::test]
async fn product_creation_stops_at_the_plan_limit() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    let plan = app.seed_plan("Starter", dec!(0), 2).await;
    app.seed_seller(&owner, &plan).await;
    let token = app.token_for(&owner);

    assert_eq!(create_product(&app, &token, "Produto 1").await.status(), 201);
    assert_eq!(create_product(&app, &token, "Produto 2").await.status(), 201);

    let third = create_product(&app, &token, "Produto 3").await;
    assert_eq!(third.status(), 403);
    let body = response_json(third).await;
    assert!(body["message"].as_str().unwrap().contains("2 of 2"));
}

#[tokio::test]
async fn negative_limit_means_unlimited() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    let plan = app.seed_plan("Premium", dec!(49.90), -1).await;
    app.seed_seller(&owner, &plan).await;
    let token = app.token_for(&owner);

    for i in 0..5 {
        let response = create_product(&app, &token, &format!("Produto {}", i)).await;
        assert_eq!(response.status(), 201);
    }
}

#[tokio::test]
async fn inactive_products_do_not_count_against_the_quota() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    let plan = app.seed_plan("Starter", dec!(0), 2).await;
    let seller = app.seed_seller(&owner, &plan).await;
    let token = app.token_for(&owner);

    app.seed_product(&seller.id, "Ativo", dec!(10), 1).await;
    app.seed_product_with(&seller.id, "Desativado", dec!(10), 1, false)
        .await;

    // One active of two allowed, so one more fits.
    assert_eq!(create_product(&app, &token, "Novo").await.status(), 201);
    assert_eq!(create_product(&app, &token, "Excesso").await.status(), 403);
}

#[tokio::test]
async fn photo_count_is_capped_by_the_plan() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    // seeded plans allow 5 photos per product
    let plan = app.seed_plan("Starter", dec!(0), 10).await;
    app.seed_seller(&owner, &plan).await;
    let token = app.token_for(&owner);

    let photos: Vec<String> = (0..6).map(|i| format!("https://cdn.test/p{}.jpg", i)).collect();
    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Produto", "price": "19.90", "stock": 5, "photos": photos })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 403);
    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("6 of 5"));

    let within_cap: Vec<String> = (0..5).map(|i| format!("https://cdn.test/p{}.jpg", i)).collect();
    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Produto", "price": "19.90", "stock": 5, "photos": within_cap })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn only_sellers_can_create_products() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com").await;

    let response = create_product(&app, &app.token_for(&buyer), "Produto").await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn negative_price_is_rejected() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    let plan = app.seed_plan("Starter", dec!(0), 10).await;
    app.seed_seller(&owner, &plan).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Produto", "price": "-1.00", "stock": 5 })),
            Some(&app.token_for(&owner)),
        )
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn negative_stock_is_rejected() {
    let app = TestApp::new().await;
    let owner = app.seed_user("seller@example.com").await;
    let plan = app.seed_plan("Starter", dec!(0), 10).await;
    app.seed_seller(&owner, &plan).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Produto", "price": "9.90", "stock": -3 })),
            Some(&app.token_for(&owner)),
        )
        .await;

    assert_eq!(response.status(), 400);
}

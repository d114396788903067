/*!
 * Marketplace settlement API.
 *
 * Splits buyer carts into per-seller orders at checkout, creates charges with
 * the billing gateway, reconciles payment state from webhooks and enforces
 * per-plan product quotas.
 */

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod services;

use axum::{routing::get, Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthRouterExt;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Full v1 API surface.
///
/// The webhook route is added after the auth layer; the gateway authenticates
/// with its own token, not a user JWT.
pub fn api_v1_routes() -> Router<AppState> {
    let checkout = handlers::checkout::checkout_routes().with_auth();
    let payments = handlers::payments::payment_routes().with_auth().route(
        "/webhook",
        axum::routing::post(handlers::payment_webhooks::payment_webhook),
    );
    let products = handlers::products::product_routes().with_auth();

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Checkout API
        .nest("/checkout", checkout)
        // Payments API
        .nest("/payments", payments)
        // Products API
        .nest("/products", products)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "marketplace-settlement-api",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_carries_data_and_meta() {
        let resp = ApiResponse::success(json!({"ok": true}));
        assert!(resp.success);
        assert!(resp.data.is_some());
        assert!(resp.meta.is_some());
        assert!(resp.message.is_none());
    }

    #[test]
    fn error_envelope_has_no_data() {
        let resp = ApiResponse::<Value>::error("oops".into());
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.message.as_deref(), Some("oops"));
    }
}

use crate::auth::AuthUser;
use crate::entities::{product, seller};
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::handlers::AppState;
use crate::{events::Event, ApiResponse};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,

    pub price: Decimal,

    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,

    /// Photo URLs; count is capped by the seller's plan
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Create a product, subject to the seller's plan quota
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = crate::ApiResponse<crate::entities::product::Model>),
        (status = 403, description = "Plan quota reached", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&request)?;

    if request.price < Decimal::ZERO {
        return Err(ApiError::ValidationError(
            "Price cannot be negative".to_string(),
        ));
    }

    let seller_row = seller::Entity::find()
        .filter(seller::Column::UserId.eq(user.user_id.clone()))
        .one(&*state.db)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?
        .ok_or_else(|| {
            map_service_error(ServiceError::Forbidden(
                "Only sellers can create products".to_string(),
            ))
        })?;

    state
        .services
        .quota
        .ensure_can_create_product(&seller_row.id)
        .await
        .map_err(map_service_error)?;

    state
        .services
        .quota
        .ensure_photo_count(&seller_row.id, request.photos.len())
        .await
        .map_err(map_service_error)?;

    let photos = if request.photos.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&request.photos).map_err(|e| {
            map_service_error(ServiceError::InternalError(format!(
                "failed to encode photos: {}",
                e
            )))
        })?)
    };

    let now = Utc::now();
    let created = product::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        seller_id: Set(seller_row.id),
        name: Set(request.name),
        price: Set(request.price),
        stock: Set(request.stock),
        photos: Set(photos),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;

    if let Err(e) = state
        .event_sender
        .send(Event::ProductCreated(created.id.clone()))
        .await
    {
        warn!("Failed to publish product created event: {}", e);
    }

    Ok(created_response(ApiResponse::success(created)))
}

pub fn product_routes() -> Router<AppState> {
    Router::new().route("/", post(create_product))
}

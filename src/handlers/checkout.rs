use crate::auth::AuthUser;
use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::handlers::AppState;
use crate::services::checkout::CheckoutRequest;
use crate::{errors::ApiError, ApiResponse};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

/// Convert the buyer's cart into per-seller orders
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Orders created", body = crate::ApiResponse<crate::services::checkout::CheckoutResponse>),
        (status = 400, description = "Empty or invalid cart", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&request)?;

    let response = state
        .services
        .checkout
        .checkout(&user.user_id, request)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(ApiResponse::success(response)))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

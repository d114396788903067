use crate::auth::AuthUser;
use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::handlers::AppState;
use crate::services::payments::CreatePlanPaymentRequest;
use crate::{errors::ApiError, ApiResponse};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};

/// Create a gateway charge for a plan purchase
#[utoipa::path(
    post,
    path = "/api/v1/payments/create",
    request_body = CreatePlanPaymentRequest,
    responses(
        (status = 201, description = "Charge created or free plan activated", body = crate::ApiResponse<crate::services::payments::PlanPaymentResponse>),
        (status = 403, description = "Not a seller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Plan not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_plan_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreatePlanPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .services
        .payments
        .create_plan_payment(&user.user_id, request)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(ApiResponse::success(response)))
}

/// Fetch a payment, reconciled against the gateway
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment state", body = crate::ApiResponse<crate::entities::payment::Model>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .services
        .payments
        .get_payment(&id, &user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(payment)))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_plan_payment))
        .route("/:id", get(get_payment))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Structured error body returned to API callers.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Some cart items cannot be processed",
    "details": ["Wireless Mouse - insufficient stock (available: 3, requested: 5)"],
    "timestamp": "2026-08-28T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Itemized details (e.g., one entry per invalid cart line)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// A single cart line that failed checkout validation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvalidCartLine {
    pub product_id: String,
    pub product_name: String,
    pub reason: CartLineRejection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CartLineRejection {
    InactiveProduct,
    InsufficientStock,
}

impl std::fmt::Display for InvalidCartLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            CartLineRejection::InactiveProduct => {
                write!(f, "{} is no longer available", self.product_name)
            }
            CartLineRejection::InsufficientStock => write!(
                f,
                "{} - insufficient stock (available: {}, requested: {})",
                self.product_name,
                self.available.unwrap_or(0),
                self.requested.unwrap_or(0)
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Some cart items cannot be processed")]
    CartValidation(Vec<InvalidCartLine>),

    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Plan limit exceeded: {used} of {limit} used")]
    QuotaExceeded { used: i64, limit: i64 },

    #[error("Payment gateway is not configured")]
    GatewayConfiguration,

    #[error("Payment gateway rejected the request: {status} - {body}")]
    GatewayRejected { status: u16, body: String },

    #[error("Payment gateway unreachable: {0}")]
    GatewayUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<crate::gateway::GatewayError> for ServiceError {
    fn from(err: crate::gateway::GatewayError) -> Self {
        match err {
            crate::gateway::GatewayError::Configuration => ServiceError::GatewayConfiguration,
            crate::gateway::GatewayError::Rejected { status, body } => {
                ServiceError::GatewayRejected { status, body }
            }
            crate::gateway::GatewayError::Unreachable(msg) => {
                ServiceError::GatewayUnavailable(msg)
            }
            crate::gateway::GatewayError::Decode(msg) => ServiceError::InternalError(msg),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::InvalidOperation(_)
            | Self::EmptyCart
            | Self::CartValidation(_)
            | Self::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            // Gateway failures are not buyer-correctable; surfaced as 500
            Self::GatewayConfiguration
            | Self::GatewayRejected { .. }
            | Self::GatewayUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message suitable for HTTP responses.
    /// Internal and gateway errors return generic messages to avoid leaking detail.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayConfiguration | Self::GatewayRejected { .. } => {
                "Error processing payment with the billing gateway".to_string()
            }
            Self::GatewayUnavailable(_) => {
                "Billing gateway unavailable, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Itemized detail entries, where the error carries them.
    pub fn detail_entries(&self) -> Option<Vec<String>> {
        match self {
            Self::CartValidation(lines) => {
                Some(lines.iter().map(|l| l.to_string()).collect())
            }
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.detail_entries(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API error type for HTTP handlers that layer request-shape failures on top
/// of service errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(err) => err.into_response(),
            ApiError::ValidationError(msg) => {
                ServiceError::ValidationError(msg).into_response()
            }
        }
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient credits: need {required_credits}, have {current_balance}")]
    InsufficientCredits {
        current_balance: i32,
        required_credits: i32,
    },

    #[error("Credit transaction failed: {0}")]
    TransactionFailed(String),

    #[error("AI provider error: {0}")]
    AIProvider(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    ExpiredToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Storage or runtime faults, as opposed to business-rule rejections
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ApiError::Database(_) | ApiError::TransactionFailed(_) | ApiError::Internal(_)
        )
    }

    /// Re-label a storage fault raised inside an atomic balance write.
    /// Business-rule errors pass through unchanged.
    pub fn into_transaction_failure(self) -> Self {
        match self {
            ApiError::Database(e) => ApiError::TransactionFailed(e.to_string()),
            other => other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;

        let (status, error_code, message) = match self {
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::UserNotFound(ref user_id) => (
                StatusCode::NOT_FOUND,
                "USER_NOT_FOUND",
                format!("No credit record for user {}", user_id),
            ),
            ApiError::InvalidAmount(ref msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", msg.clone())
            }
            ApiError::InsufficientCredits {
                current_balance,
                required_credits,
            } => {
                details = Some(json!({
                    "currentBalance": current_balance,
                    "requiredCredits": required_credits,
                }));
                (
                    StatusCode::PAYMENT_REQUIRED,
                    "INSUFFICIENT_CREDITS",
                    format!(
                        "This action costs {} credits but only {} are available",
                        required_credits, current_balance
                    ),
                )
            }
            ApiError::TransactionFailed(ref msg) => {
                tracing::error!("Credit transaction failed: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "TRANSACTION_FAILED",
                    "Could not update credits right now, please retry".to_string(),
                )
            }
            ApiError::AIProvider(ref msg) => {
                tracing::error!("AI provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "AI_PROVIDER_ERROR",
                    "AI service temporarily unavailable".to_string(),
                )
            }
            ApiError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(ref msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::InvalidToken(ref msg) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", msg.clone())
            }
            ApiError::ExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "Access token has expired".to_string(),
            ),
            ApiError::Forbidden(ref msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        let body = json!({
            "success": false,
            "error": error,
        });

        (status, Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ApiError>;

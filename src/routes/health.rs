use axum::Json;

use crate::models::common::MessageResponse;

/// GET /api/v1/health
pub async fn health() -> Json<MessageResponse> {
    Json(MessageResponse::new("ok"))
}

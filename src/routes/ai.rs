use axum::{extract::State, Json};
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        ai::{GenerateTextData, GenerateTextRequest},
        common::SuccessResponse,
    },
};

/// POST /api/v1/ai/generate
///
/// Charged by `credit_guard_middleware`; this handler only talks to the provider.
#[instrument(skip(state, identity, request), fields(user_id = %identity.user_id))]
pub async fn generate_text(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<GenerateTextRequest>,
) -> Result<Json<SuccessResponse<GenerateTextData>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let data = state
        .ai_service
        .generate_text(
            request.feature,
            &request.prompt,
            request.job_description.as_deref(),
        )
        .await?;

    Ok(Json(SuccessResponse::new(data)))
}

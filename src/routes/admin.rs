use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        admin::{ConsumptionPattern, ConversionReport, SystemStats, UsageAlert},
        common::SuccessResponse,
        credits::{
            AdjustCreditsRequest, BalanceConsistency, CreditBalanceData, CreditMutationData,
            RefundCreditsRequest, TransactionHistoryQuery, TransactionPage,
            UpdateSubscriptionRequest,
        },
    },
    store::{Metadata, SubscriptionUpdate},
};

/// POST /api/v1/admin/credits/adjust
#[instrument(skip(state, identity, request), fields(admin_id = %identity.user_id))]
pub async fn adjust_credits(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<AdjustCreditsRequest>,
) -> Result<Json<SuccessResponse<CreditMutationData>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let receipt = state
        .credit_service
        .adjust_user_credits(
            &request.user_id,
            request.delta,
            &request.reason,
            &identity.user_id,
        )
        .await?;

    Ok(Json(SuccessResponse::new(receipt.into())))
}

/// POST /api/v1/admin/credits/refund
#[instrument(skip(state, identity, request), fields(admin_id = %identity.user_id))]
pub async fn refund_credits(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(request): Json<RefundCreditsRequest>,
) -> Result<Json<SuccessResponse<CreditMutationData>>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let mut metadata = Metadata::new();
    metadata.insert("adminId".to_string(), Value::from(identity.user_id));
    if let Some(original) = request.original_transaction_id {
        metadata.insert(
            "originalTransactionId".to_string(),
            Value::from(original.to_string()),
        );
    }

    let receipt = state
        .credit_service
        .refund_credits(
            &request.user_id,
            request.amount,
            &request.reason,
            Some(metadata),
        )
        .await?;

    Ok(Json(SuccessResponse::new(receipt.into())))
}

/// PUT /api/v1/admin/users/{user_id}/subscription
#[instrument(skip(state, request))]
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<SuccessResponse<CreditBalanceData>>> {
    let account = state
        .credit_service
        .update_user_subscription(
            &user_id,
            SubscriptionUpdate {
                tier: request.tier,
                status: request.status,
            },
        )
        .await?;

    Ok(Json(SuccessResponse::new(account.into())))
}

/// GET /api/v1/admin/users/{user_id}/consistency
#[instrument(skip(state))]
pub async fn check_consistency(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SuccessResponse<BalanceConsistency>>> {
    let report = state
        .credit_service
        .validate_balance_consistency(&user_id)
        .await?;

    Ok(Json(SuccessResponse::new(report)))
}

/// GET /api/v1/admin/users/{user_id}/usage-pattern
#[instrument(skip(state))]
pub async fn usage_pattern(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SuccessResponse<ConsumptionPattern>>> {
    let pattern = state.admin_service.get_consumption_pattern(&user_id).await?;
    Ok(Json(SuccessResponse::new(pattern)))
}

/// GET /api/v1/admin/users/{user_id}/transactions
#[instrument(skip(state))]
pub async fn user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<TransactionHistoryQuery>,
) -> Result<Json<SuccessResponse<TransactionPage>>> {
    let page = state
        .credit_service
        .get_existing_transaction_history(&user_id, query.pagination(), query.transaction_type)
        .await?;

    Ok(Json(SuccessResponse::new(page)))
}

/// GET /api/v1/admin/stats
#[instrument(skip(state))]
pub async fn system_stats(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<SystemStats>>> {
    let stats = state.admin_service.get_system_stats().await?;
    Ok(Json(SuccessResponse::new(stats)))
}

/// GET /api/v1/admin/alerts
#[instrument(skip(state))]
pub async fn usage_alerts(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<UsageAlert>>>> {
    let alerts = state.admin_service.generate_usage_alerts().await?;
    Ok(Json(SuccessResponse::new(alerts)))
}

/// GET /api/v1/admin/conversions
#[instrument(skip(state))]
pub async fn conversion_report(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<ConversionReport>>> {
    let report = state.admin_service.get_conversion_report().await?;
    Ok(Json(SuccessResponse::new(report)))
}

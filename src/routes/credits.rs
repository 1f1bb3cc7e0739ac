use axum::{
    extract::{Query, State},
    Json,
};
use tracing::instrument;

use crate::{
    app_state::AppState,
    error::Result,
    middleware::UserIdentity,
    models::{
        common::SuccessResponse,
        credits::{CreditBalanceData, TransactionHistoryQuery, TransactionPage},
    },
};

/// GET /api/v1/credits
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn get_credits(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<SuccessResponse<CreditBalanceData>>> {
    let account = state
        .credit_service
        .ensure_account(&identity.user_id)
        .await?;

    Ok(Json(SuccessResponse::new(account.into())))
}

/// GET /api/v1/credits/transactions
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn get_transactions(
    State(state): State<AppState>,
    identity: UserIdentity,
    Query(query): Query<TransactionHistoryQuery>,
) -> Result<Json<SuccessResponse<TransactionPage>>> {
    let page = state
        .credit_service
        .get_transaction_history(
            &identity.user_id,
            query.pagination(),
            query.transaction_type,
        )
        .await?;

    Ok(Json(SuccessResponse::new(page)))
}

//! Metering for credit-consuming operations.
//!
//! A guarded operation walks `Unchecked -> Validated -> Executing` and ends in
//! `Deducted` or `DeductionFailed`; an insufficient balance ends it at
//! `Rejected` before the operation runs. The charge happens only after the
//! operation succeeds, and a charge that fails afterwards never takes the
//! result away from the caller.

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    services::CreditService,
    store::{LedgerReceipt, Metadata},
};
use axum::{
    extract::{OriginalUri, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tracing::{debug, error, info};

pub const AI_REQUEST_REASON: &str = "AI request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Unchecked,
    Validated,
    Rejected,
    Executing,
    Deducted,
    DeductionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditCheck {
    Sufficient {
        balance: i32,
    },
    Insufficient {
        current_balance: i32,
        required_credits: i32,
    },
}

/// What to charge, and to whom, once the operation succeeds
#[derive(Debug, Clone)]
pub struct MeteredRequest {
    pub user_id: String,
    pub cost: i32,
    pub reason: String,
    pub metadata: Metadata,
}

impl MeteredRequest {
    pub fn new(user_id: impl Into<String>, cost: i32, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cost,
            reason: reason.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn metadata_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("-")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeductionStatus {
    Deducted(LedgerReceipt),
    /// The operation's output was still delivered; needs manual reconciliation
    Failed { reason: String },
}

#[derive(Debug)]
pub struct GuardedOutput<T> {
    pub output: T,
    pub deduction: DeductionStatus,
}

pub struct CreditGuard {
    credit_service: Arc<CreditService>,
}

impl CreditGuard {
    pub fn new(credit_service: Arc<CreditService>) -> Self {
        Self { credit_service }
    }

    /// Read-only balance check
    pub async fn validate_credits(&self, user_id: &str, required: i32) -> Result<CreditCheck> {
        let balance = self.credit_service.get_user_credits(user_id).await?;

        Ok(if balance >= required {
            CreditCheck::Sufficient { balance }
        } else {
            CreditCheck::Insufficient {
                current_balance: balance,
                required_credits: required,
            }
        })
    }

    /// Run `op` once if the user can pay for it, then charge for it
    pub async fn run<T, F, Fut>(&self, request: MeteredRequest, op: F) -> Result<GuardedOutput<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(&request).await?;

        let output = op().await?;

        let deduction = self.settle(&request).await;
        Ok(GuardedOutput { output, deduction })
    }

    /// `Unchecked -> Validated -> Executing`, or `Rejected`
    pub async fn admit(&self, request: &MeteredRequest) -> Result<()> {
        log_phase(GuardPhase::Unchecked, request);

        match self
            .validate_credits(&request.user_id, request.cost)
            .await?
        {
            CreditCheck::Sufficient { .. } => {
                log_phase(GuardPhase::Validated, request);
                log_phase(GuardPhase::Executing, request);
                Ok(())
            }
            CreditCheck::Insufficient {
                current_balance,
                required_credits,
            } => {
                log_phase(GuardPhase::Rejected, request);
                Err(ApiError::InsufficientCredits {
                    current_balance,
                    required_credits,
                })
            }
        }
    }

    /// Charge a completed operation exactly once
    pub async fn settle(&self, request: &MeteredRequest) -> DeductionStatus {
        let result = self
            .credit_service
            .atomic_deduct_credits(
                &request.user_id,
                request.cost,
                &request.reason,
                Some(request.metadata.clone()),
            )
            .await;

        match result {
            Ok(receipt) => {
                log_phase(GuardPhase::Deducted, request);
                DeductionStatus::Deducted(receipt)
            }
            Err(e) => {
                log_phase(GuardPhase::DeductionFailed, request);
                error!(
                    user_id = %request.user_id,
                    amount = request.cost,
                    endpoint = request.metadata_str("endpoint"),
                    request_id = request.metadata_str("requestId"),
                    infrastructure = e.is_infrastructure(),
                    error = %e,
                    "Credit deduction failed after successful operation, reconcile manually"
                );
                DeductionStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn log_phase(phase: GuardPhase, request: &MeteredRequest) {
    match phase {
        GuardPhase::Rejected => info!(
            user_id = %request.user_id,
            cost = request.cost,
            "Credit guard rejected request"
        ),
        _ => debug!(user_id = %request.user_id, cost = request.cost, ?phase, "Credit guard"),
    }
}

/// Charge `credits.ai_request_cost` for each successful (2xx) response.
/// Must run after `jwt_auth_middleware`.
pub async fn credit_guard_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let identity = request
        .extensions()
        .get::<UserIdentity>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Missing user identity".to_string()))?;

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // Nested routers see the path with their prefix stripped
    let endpoint = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path())
        .unwrap_or_else(|| request.uri().path())
        .to_string();

    let metered = MeteredRequest::new(
        identity.user_id,
        state.credit_service.config().ai_request_cost,
        AI_REQUEST_REASON,
    )
    .with_metadata("endpoint", endpoint)
    .with_metadata("requestId", request_id);

    state.credit_guard.admit(&metered).await?;

    let mut response = next.run(request).await;
    if !response.status().is_success() {
        debug!(
            status = response.status().as_u16(),
            "Metered request failed, no charge"
        );
        return Ok(response);
    }

    if let DeductionStatus::Deducted(receipt) = state.credit_guard.settle(&metered).await {
        response
            .headers_mut()
            .insert("x-credits-remaining", HeaderValue::from(receipt.new_balance));
    }

    Ok(response)
}

use crate::{
    config::CreditsConfig,
    error::{ApiError, Result},
    models::{
        common::Pagination,
        credits::{BalanceConsistency, TransactionPage, TransactionRecord},
    },
    store::{
        LedgerReceipt, LedgerStore, LedgerWrite, Metadata, SubscriptionUpdate, TransactionQuery,
        UserCreditRecord,
    },
};
use entity::sea_orm_active_enums::TransactionType;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Balance operations over the ledger store.
///
/// Every mutation is a single `write_transaction_and_balance` call, so the
/// balance check, the balance update and the log entry commit together.
pub struct CreditService {
    store: Arc<dyn LedgerStore>,
    config: CreditsConfig,
}

impl CreditService {
    pub fn new(store: Arc<dyn LedgerStore>, config: CreditsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CreditsConfig {
        &self.config
    }

    /// Fetch the user's record, creating the default one on first contact
    #[instrument(skip(self))]
    pub async fn ensure_account(&self, user_id: &str) -> Result<UserCreditRecord> {
        if let Some(account) = self.store.find_account(user_id).await? {
            return Ok(account);
        }

        let account = self
            .store
            .provision_account(user_id, self.config.default_grant)
            .await?;
        info!(
            "Provisioned credit record: user={}, balance={}",
            user_id, account.credits
        );

        Ok(account)
    }

    /// Existing record only; used from admin paths
    pub async fn get_account(&self, user_id: &str) -> Result<UserCreditRecord> {
        self.store
            .find_account(user_id)
            .await?
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn get_user_credits(&self, user_id: &str) -> Result<i32> {
        Ok(self.ensure_account(user_id).await?.credits)
    }

    /// Grant credits. Zero is accepted for annotation-only entries.
    #[instrument(skip(self, metadata))]
    pub async fn add_credits(
        &self,
        user_id: &str,
        amount: i32,
        reason: &str,
        metadata: Option<Metadata>,
    ) -> Result<i32> {
        if amount < 0 {
            return Err(ApiError::InvalidAmount(format!(
                "Credit amount must be non-negative, got {}",
                amount
            )));
        }

        self.ensure_account(user_id).await?;

        let receipt = self
            .store
            .write_transaction_and_balance(
                user_id,
                LedgerWrite::addition(amount, reason, metadata.unwrap_or_default()),
            )
            .await?;

        info!(
            "Added credits: user={}, amount={}, balance={}",
            user_id, amount, receipt.new_balance
        );

        Ok(receipt.new_balance)
    }

    /// Check-and-debit in one atomic store write
    #[instrument(skip(self, metadata))]
    pub async fn atomic_deduct_credits(
        &self,
        user_id: &str,
        amount: i32,
        reason: &str,
        metadata: Option<Metadata>,
    ) -> Result<LedgerReceipt> {
        if amount <= 0 {
            return Err(ApiError::InvalidAmount(format!(
                "Deduction amount must be positive, got {}",
                amount
            )));
        }

        self.ensure_account(user_id).await?;

        let receipt = self
            .store
            .write_transaction_and_balance(
                user_id,
                LedgerWrite::deduction(amount, reason, metadata.unwrap_or_default()),
            )
            .await?;

        info!(
            "Deducted credits: user={}, amount={}, balance={}",
            user_id, amount, receipt.new_balance
        );

        Ok(receipt)
    }

    #[instrument(skip(self, metadata))]
    pub async fn refund_credits(
        &self,
        user_id: &str,
        amount: i32,
        reason: &str,
        metadata: Option<Metadata>,
    ) -> Result<LedgerReceipt> {
        if amount <= 0 {
            return Err(ApiError::InvalidAmount(format!(
                "Refund amount must be positive, got {}",
                amount
            )));
        }

        let receipt = self
            .store
            .write_transaction_and_balance(
                user_id,
                LedgerWrite::refund(amount, reason, metadata.unwrap_or_default()),
            )
            .await?;

        info!(
            "Refunded credits: user={}, amount={}, balance={}",
            user_id, amount, receipt.new_balance
        );

        Ok(receipt)
    }

    /// Administrative override. Negative deltas are clamped so the balance
    /// stops at zero; the clamp is recorded in the transaction metadata.
    #[instrument(skip(self))]
    pub async fn adjust_user_credits(
        &self,
        user_id: &str,
        delta: i32,
        reason: &str,
        admin_id: &str,
    ) -> Result<LedgerReceipt> {
        if delta == 0 {
            return Err(ApiError::InvalidAmount(
                "Adjustment delta must not be zero".to_string(),
            ));
        }
        if delta.unsigned_abs() > self.config.max_admin_adjustment.unsigned_abs() {
            return Err(ApiError::InvalidAmount(format!(
                "Adjustment of {} exceeds the limit of {}",
                delta, self.config.max_admin_adjustment
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert("adminId".to_string(), Value::from(admin_id));
        metadata.insert("requestedDelta".to_string(), Value::from(delta));

        let receipt = self
            .store
            .write_transaction_and_balance(user_id, LedgerWrite::adjustment(delta, reason, metadata))
            .await?;

        if receipt.applied_delta != delta {
            warn!(
                "Adjustment clamped at zero: user={}, requested={}, applied={}",
                user_id, delta, receipt.applied_delta
            );
        }
        info!(
            "Admin adjustment: admin={}, user={}, delta={}, balance={}",
            admin_id, user_id, receipt.applied_delta, receipt.new_balance
        );

        Ok(receipt)
    }

    /// Mirror subscription metadata from billing. Never touches the balance; a
    /// cancellation is annotated in the log by the store.
    #[instrument(skip(self))]
    pub async fn update_user_subscription(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<UserCreditRecord> {
        if update.is_empty() {
            return Err(ApiError::BadRequest(
                "Subscription update needs a tier or a status".to_string(),
            ));
        }

        let account = self.store.update_subscription(user_id, update).await?;

        info!(
            "Updated subscription: user={}, tier={:?}, status={:?}",
            user_id, account.subscription_tier, account.subscription_status
        );

        Ok(account)
    }

    /// Compare the stored balance with the replayed log. Reports drift, never repairs it.
    #[instrument(skip(self))]
    pub async fn validate_balance_consistency(&self, user_id: &str) -> Result<BalanceConsistency> {
        let user_balance = self.store.get_balance(user_id).await?;
        let calculated_balance = self.store.signed_transaction_total(user_id).await?;

        let report = BalanceConsistency {
            is_consistent: i64::from(user_balance) == calculated_balance,
            user_balance,
            calculated_balance,
        };

        if !report.is_consistent {
            warn!(
                "Balance drift detected: user={}, stored={}, calculated={}, drift={}",
                user_id,
                user_balance,
                calculated_balance,
                report.drift()
            );
        }

        Ok(report)
    }

    /// One page of history, newest first
    #[instrument(skip(self))]
    pub async fn get_transaction_history(
        &self,
        user_id: &str,
        pagination: Pagination,
        kind: Option<TransactionType>,
    ) -> Result<TransactionPage> {
        self.ensure_account(user_id).await?;
        self.history_page(user_id, pagination, kind).await
    }

    /// Same as [`Self::get_transaction_history`] without provisioning
    pub async fn get_existing_transaction_history(
        &self,
        user_id: &str,
        pagination: Pagination,
        kind: Option<TransactionType>,
    ) -> Result<TransactionPage> {
        self.get_account(user_id).await?;
        self.history_page(user_id, pagination, kind).await
    }

    async fn history_page(
        &self,
        user_id: &str,
        pagination: Pagination,
        kind: Option<TransactionType>,
    ) -> Result<TransactionPage> {
        let limit = pagination.effective_limit();
        let offset = pagination.offset;

        let total = self.store.count_transactions(user_id, kind).await?;
        let transactions = self
            .store
            .list_transactions(
                user_id,
                TransactionQuery {
                    limit,
                    offset,
                    kind,
                },
            )
            .await?;

        let has_more = offset + (transactions.len() as u64) < total;

        Ok(TransactionPage {
            transactions: transactions.into_iter().map(TransactionRecord::from).collect(),
            total,
            limit,
            offset,
            has_more,
        })
    }
}

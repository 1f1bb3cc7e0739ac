//! Ledger storage: per-user balance records plus the append-only transaction log.
//!
//! Every balance mutation goes through [`LedgerStore::write_transaction_and_balance`],
//! which must apply the balance check, the balance update and the transaction insert
//! as one atomic unit per user. The overdraft and clamp rules live in
//! [`plan_balance_change`] so both backends enforce them identically.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

use crate::{
    error::{ApiError, Result},
    models::ledger_ext::{SubscriptionTierExt, TransactionTypeExt},
};
use async_trait::async_trait;
use entity::sea_orm_active_enums::{SubscriptionStatus, SubscriptionTier, TransactionType};
use sea_orm::FromQueryResult;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub type UserCreditRecord = entity::user_credits::Model;
pub type CreditTransaction = entity::credit_transactions::Model;

/// Open key/value bag attached to each transaction
pub type Metadata = serde_json::Map<String, Value>;

/// Reason recorded on the grant transaction written at provisioning time
pub const INITIAL_GRANT_REASON: &str = "Initial credit grant";

/// Reason recorded on the zero-amount entry written when a subscription is cancelled
pub const SUBSCRIPTION_CANCELLED_REASON: &str = "Subscription cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    /// Reject the write if the balance would drop below zero
    Strict,
    /// Apply only the part of a negative delta that keeps the balance at zero
    ClampAtZero,
}

/// A single balance mutation, applied atomically with its transaction record
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub kind: TransactionType,
    pub delta: i32,
    pub policy: BalancePolicy,
    pub reason: String,
    pub metadata: Metadata,
}

impl LedgerWrite {
    pub fn addition(amount: i32, reason: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind: TransactionType::Addition,
            delta: amount,
            policy: BalancePolicy::Strict,
            reason: reason.into(),
            metadata,
        }
    }

    pub fn refund(amount: i32, reason: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind: TransactionType::Refund,
            delta: amount,
            policy: BalancePolicy::Strict,
            reason: reason.into(),
            metadata,
        }
    }

    pub fn deduction(amount: i32, reason: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind: TransactionType::Deduction,
            delta: -amount,
            policy: BalancePolicy::Strict,
            reason: reason.into(),
            metadata,
        }
    }

    /// Signed administrative change, clamped so the balance never goes negative
    pub fn adjustment(delta: i32, reason: impl Into<String>, metadata: Metadata) -> Self {
        let kind = if delta < 0 {
            TransactionType::Deduction
        } else {
            TransactionType::Addition
        };

        Self {
            kind,
            delta,
            policy: BalancePolicy::ClampAtZero,
            reason: reason.into(),
            metadata,
        }
    }
}

/// Outcome of a committed balance write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub transaction_id: Uuid,
    pub transaction_type: TransactionType,
    pub new_balance: i32,
    pub applied_delta: i32,
}

impl LedgerReceipt {
    pub fn from_transaction(transaction: &CreditTransaction, applied_delta: i32) -> Self {
        Self {
            transaction_id: transaction.id,
            transaction_type: transaction.transaction_type,
            new_balance: transaction.balance_after,
            applied_delta,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub tier: Option<SubscriptionTier>,
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.tier.is_none() && self.status.is_none()
    }

    /// Whether applying this update to `account` moves it into `cancelled`
    pub fn cancels(&self, account: &UserCreditRecord) -> bool {
        self.status == Some(SubscriptionStatus::Cancelled)
            && account.subscription_status != SubscriptionStatus::Cancelled
    }

    /// Annotation logged alongside a cancelling update. Leaves the balance alone.
    pub fn cancellation_write(&self, account: &UserCreditRecord) -> LedgerWrite {
        let tier = self.tier.unwrap_or(account.subscription_tier);
        let mut metadata = Metadata::new();
        metadata.insert("subscriptionTier".to_string(), Value::from(tier.as_str()));

        LedgerWrite::addition(0, SUBSCRIPTION_CANCELLED_REASON, metadata)
    }
}

/// Page request for a single user's history, newest first
#[derive(Debug, Clone, Copy)]
pub struct TransactionQuery {
    pub limit: u64,
    pub offset: u64,
    pub kind: Option<TransactionType>,
}

/// Range filter for cross-user scans, results oldest first
#[derive(Debug, Clone, Default)]
pub struct TransactionScan {
    pub user_id: Option<String>,
    pub kind: Option<TransactionType>,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
}

impl TransactionScan {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn of_kind(mut self, kind: TransactionType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: OffsetDateTime) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, transaction: &CreditTransaction) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |user_id| transaction.user_id == user_id)
            && self
                .kind
                .map_or(true, |kind| transaction.transaction_type == kind)
            && self.since.map_or(true, |since| transaction.created_at >= since)
            && self.until.map_or(true, |until| transaction.created_at < until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKey {
    TransactionType,
    User,
    /// UTC calendar day, formatted `YYYY-MM-DD`
    Day,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    pub group_key: String,
    pub total_amount: i64,
    pub transaction_count: i64,
    pub distinct_users: i64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, user_id: &str) -> Result<Option<UserCreditRecord>>;

    /// Create the record with `initial_grant` credits unless it already exists.
    /// The grant is logged as the user's first addition so the log stays the
    /// source of truth for the balance.
    async fn provision_account(&self, user_id: &str, initial_grant: i32)
        -> Result<UserCreditRecord>;

    async fn get_balance(&self, user_id: &str) -> Result<i32>;

    async fn write_transaction_and_balance(
        &self,
        user_id: &str,
        write: LedgerWrite,
    ) -> Result<LedgerReceipt>;

    /// Apply tier/status changes without touching the balance. A move into
    /// `cancelled` also appends [`SubscriptionUpdate::cancellation_write`] in the
    /// same atomic unit, so the annotation is written exactly once or not at all.
    async fn update_subscription(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<UserCreditRecord>;

    async fn list_transactions(
        &self,
        user_id: &str,
        query: TransactionQuery,
    ) -> Result<Vec<CreditTransaction>>;

    async fn count_transactions(&self, user_id: &str, kind: Option<TransactionType>)
        -> Result<u64>;

    /// Sum of the user's log with deductions negated
    async fn signed_transaction_total(&self, user_id: &str) -> Result<i64>;

    async fn list_accounts(&self) -> Result<Vec<UserCreditRecord>>;

    async fn scan_transactions(&self, scan: TransactionScan) -> Result<Vec<CreditTransaction>>;

    async fn aggregate_across_users(
        &self,
        scan: TransactionScan,
        group_by: AggregateKey,
    ) -> Result<Vec<AggregateRow>>;
}

/// Result of checking a [`LedgerWrite`] against the current balance
#[derive(Debug, Clone, PartialEq)]
pub struct BalancePlan {
    pub new_balance: i32,
    pub applied_delta: i32,
    pub metadata: Metadata,
}

impl BalancePlan {
    /// Magnitude stored in the transaction's `amount` column
    pub fn amount(&self) -> i32 {
        self.applied_delta.abs()
    }
}

pub fn plan_balance_change(current: i32, write: &LedgerWrite) -> Result<BalancePlan> {
    match write.kind {
        TransactionType::Addition | TransactionType::Refund if write.delta < 0 => {
            return Err(ApiError::InvalidAmount(format!(
                "{:?} requires a non-negative amount, got {}",
                write.kind, write.delta
            )));
        }
        TransactionType::Deduction if write.delta > 0 => {
            return Err(ApiError::InvalidAmount(format!(
                "Deduction requires a positive amount, got {}",
                -write.delta
            )));
        }
        _ => {}
    }

    let target = current.checked_add(write.delta).ok_or_else(|| {
        ApiError::InvalidAmount(format!("Balance change of {} overflows", write.delta))
    })?;

    let mut metadata = write.metadata.clone();

    if target >= 0 {
        return Ok(BalancePlan {
            new_balance: target,
            applied_delta: write.delta,
            metadata,
        });
    }

    match write.policy {
        BalancePolicy::Strict => Err(ApiError::InsufficientCredits {
            current_balance: current,
            required_credits: -write.delta,
        }),
        BalancePolicy::ClampAtZero => {
            let applied_delta = -current;
            metadata.insert("requestedDelta".to_string(), Value::from(write.delta));
            metadata.insert("appliedDelta".to_string(), Value::from(applied_delta));
            metadata.insert("clamped".to_string(), Value::Bool(true));

            Ok(BalancePlan {
                new_balance: 0,
                applied_delta,
                metadata,
            })
        }
    }
}

/// Build the immutable log entry for a planned write
pub fn new_transaction(
    user_id: &str,
    write: &LedgerWrite,
    plan: &BalancePlan,
    created_at: OffsetDateTime,
) -> CreditTransaction {
    CreditTransaction {
        id: Uuid::now_v7(),
        user_id: user_id.to_string(),
        transaction_type: write.kind,
        amount: plan.amount(),
        reason: write.reason.clone(),
        balance_after: plan.new_balance,
        metadata: Value::Object(plan.metadata.clone()),
        created_at,
    }
}

/// Signed contribution of a transaction to the balance
pub fn signed_amount(transaction: &CreditTransaction) -> i64 {
    transaction.transaction_type.signed(transaction.amount)
}

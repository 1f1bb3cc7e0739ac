use entity::sea_orm_active_enums::{SubscriptionStatus, SubscriptionTier, TransactionType};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::{Pagination, DEFAULT_PAGE_SIZE};
use crate::store::{CreditTransaction, LedgerReceipt, UserCreditRecord};

/// Current balance plus the locally mirrored subscription
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalanceData {
    pub user_id: String,
    pub credits: i32,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_credit_update: time::OffsetDateTime,
}

impl From<UserCreditRecord> for CreditBalanceData {
    fn from(record: UserCreditRecord) -> Self {
        Self {
            user_id: record.user_id,
            credits: record.credits,
            subscription_tier: record.subscription_tier,
            subscription_status: record.subscription_status,
            last_credit_update: record.last_credit_update,
        }
    }
}

/// Single ledger entry as exposed over the API
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: uuid::Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: i32,
    pub reason: String,
    pub balance_after: i32,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl From<CreditTransaction> for TransactionRecord {
    fn from(transaction: CreditTransaction) -> Self {
        Self {
            id: transaction.id,
            user_id: transaction.user_id,
            transaction_type: transaction.transaction_type,
            amount: transaction.amount,
            reason: transaction.reason,
            balance_after: transaction.balance_after,
            metadata: transaction.metadata,
            created_at: transaction.created_at,
        }
    }
}

/// One page of history, newest first
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

/// Query string for history endpoints: `?limit=20&offset=0&type=deduction`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistoryQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
}

impl TransactionHistoryQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// Response data for any balance mutation
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreditMutationData {
    pub success: bool,
    pub new_balance: i32,
    pub transaction_id: uuid::Uuid,
    pub applied_delta: i32,
}

impl From<LedgerReceipt> for CreditMutationData {
    fn from(receipt: LedgerReceipt) -> Self {
        Self {
            success: true,
            new_balance: receipt.new_balance,
            transaction_id: receipt.transaction_id,
            applied_delta: receipt.applied_delta,
        }
    }
}

/// POST /admin/credits/adjust
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustCreditsRequest {
    #[validate(length(min = 1, max = 255))]
    pub user_id: String,

    #[validate(range(min = -10000, max = 10000))]
    pub delta: i32,

    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// POST /admin/credits/refund
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundCreditsRequest {
    #[validate(length(min = 1, max = 255))]
    pub user_id: String,

    #[validate(range(min = 1, max = 10000))]
    pub amount: i32,

    #[validate(length(min = 1, max = 500))]
    pub reason: String,

    /// Deduction being reversed, kept in the refund's metadata
    pub original_transaction_id: Option<uuid::Uuid>,
}

/// PUT /admin/users/{user_id}/subscription
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    pub tier: Option<SubscriptionTier>,
    pub status: Option<SubscriptionStatus>,
}

/// Stored balance vs. the balance replayed from the log
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceConsistency {
    pub is_consistent: bool,
    pub user_balance: i32,
    pub calculated_balance: i64,
}

impl BalanceConsistency {
    pub fn drift(&self) -> i64 {
        i64::from(self.user_balance) - self.calculated_balance
    }
}

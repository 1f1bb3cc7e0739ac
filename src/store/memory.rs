//! In-process ledger store.
//!
//! All state sits behind one async mutex, so every write is linearizable with
//! respect to every other write. Nothing is persisted and nothing is shared
//! between processes: use it for tests and local development only.

use super::{
    new_transaction, plan_balance_change, signed_amount, AggregateKey,
    AggregateRow, CreditTransaction, LedgerReceipt, LedgerStore, LedgerWrite, Metadata,
    SubscriptionUpdate, TransactionQuery, TransactionScan, UserCreditRecord,
    INITIAL_GRANT_REASON,
};
use crate::{
    error::{ApiError, Result},
    models::ledger_ext::TransactionTypeExt,
};
use async_trait::async_trait;
use entity::sea_orm_active_enums::{SubscriptionStatus, SubscriptionTier, TransactionType};
use std::collections::{BTreeMap, HashMap, HashSet};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, UserCreditRecord>,
    /// Append order, which is also commit order
    transactions: Vec<CreditTransaction>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing records, e.g. fixtures or an exported snapshot.
    /// Transactions are kept in `created_at` order.
    pub fn seeded(
        accounts: impl IntoIterator<Item = UserCreditRecord>,
        transactions: impl IntoIterator<Item = CreditTransaction>,
    ) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.user_id.clone(), account))
            .collect();

        let mut transactions: Vec<_> = transactions.into_iter().collect();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Self {
            state: Mutex::new(LedgerState {
                accounts,
                transactions,
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_account(&self, user_id: &str) -> Result<Option<UserCreditRecord>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(user_id).cloned())
    }

    #[instrument(skip(self))]
    async fn provision_account(
        &self,
        user_id: &str,
        initial_grant: i32,
    ) -> Result<UserCreditRecord> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.accounts.get(user_id) {
            return Ok(existing.clone());
        }

        let now = OffsetDateTime::now_utc();
        let account = UserCreditRecord {
            user_id: user_id.to_string(),
            credits: 0,
            subscription_tier: SubscriptionTier::Free,
            subscription_status: SubscriptionStatus::Active,
            last_credit_update: now,
            converted_at: None,
            created_at: now,
            updated_at: now,
        };

        let account = if initial_grant > 0 {
            let write = LedgerWrite::addition(initial_grant, INITIAL_GRANT_REASON, Metadata::new());
            let plan = plan_balance_change(0, &write)?;
            state
                .transactions
                .push(new_transaction(user_id, &write, &plan, now));
            UserCreditRecord {
                credits: plan.new_balance,
                ..account
            }
        } else {
            account
        };

        state.accounts.insert(user_id.to_string(), account.clone());
        debug!("Provisioned in-memory credit record for {}", user_id);

        Ok(account)
    }

    async fn get_balance(&self, user_id: &str) -> Result<i32> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(user_id)
            .map(|account| account.credits)
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))
    }

    #[instrument(skip(self, write), fields(kind = ?write.kind, delta = write.delta))]
    async fn write_transaction_and_balance(
        &self,
        user_id: &str,
        write: LedgerWrite,
    ) -> Result<LedgerReceipt> {
        let mut state = self.state.lock().await;

        let current = state
            .accounts
            .get(user_id)
            .map(|account| account.credits)
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))?;

        // Nothing is touched unless the plan succeeds
        let plan = plan_balance_change(current, &write)?;
        let now = OffsetDateTime::now_utc();
        let transaction = new_transaction(user_id, &write, &plan, now);
        let receipt = LedgerReceipt::from_transaction(&transaction, plan.applied_delta);

        if let Some(account) = state.accounts.get_mut(user_id) {
            account.credits = plan.new_balance;
            account.last_credit_update = now;
            account.updated_at = now;
        }
        state.transactions.push(transaction);

        Ok(receipt)
    }

    #[instrument(skip(self))]
    async fn update_subscription(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<UserCreditRecord> {
        let mut state = self.state.lock().await;

        let current = state
            .accounts
            .get(user_id)
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let annotation = if update.cancels(current) {
            let write = update.cancellation_write(current);
            let plan = plan_balance_change(current.credits, &write)?;
            Some(new_transaction(user_id, &write, &plan, now))
        } else {
            None
        };

        let Some(account) = state.accounts.get_mut(user_id) else {
            return Err(ApiError::UserNotFound(user_id.to_string()));
        };
        if let Some(tier) = update.tier {
            if tier != SubscriptionTier::Free && account.converted_at.is_none() {
                account.converted_at = Some(now);
            }
            account.subscription_tier = tier;
        }
        if let Some(status) = update.status {
            account.subscription_status = status;
        }
        account.updated_at = now;
        let account = account.clone();

        if let Some(transaction) = annotation {
            state.transactions.push(transaction);
        }

        Ok(account)
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        query: TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        let state = self.state.lock().await;

        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .filter(|t| query.kind.map_or(true, |kind| t.transaction_type == kind))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_transactions(
        &self,
        user_id: &str,
        kind: Option<TransactionType>,
    ) -> Result<u64> {
        let state = self.state.lock().await;

        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| kind.map_or(true, |kind| t.transaction_type == kind))
            .count() as u64)
    }

    async fn signed_transaction_total(&self, user_id: &str) -> Result<i64> {
        let state = self.state.lock().await;

        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(signed_amount)
            .sum())
    }

    async fn list_accounts(&self) -> Result<Vec<UserCreditRecord>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<_> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    async fn scan_transactions(&self, scan: TransactionScan) -> Result<Vec<CreditTransaction>> {
        let state = self.state.lock().await;

        Ok(state
            .transactions
            .iter()
            .filter(|t| scan.matches(t))
            .cloned()
            .collect())
    }

    async fn aggregate_across_users(
        &self,
        scan: TransactionScan,
        group_by: AggregateKey,
    ) -> Result<Vec<AggregateRow>> {
        let state = self.state.lock().await;

        let mut groups: BTreeMap<String, (i64, i64, HashSet<&str>)> = BTreeMap::new();
        for transaction in state.transactions.iter().filter(|t| scan.matches(t)) {
            let key = match group_by {
                AggregateKey::TransactionType => {
                    transaction.transaction_type.as_str().to_string()
                }
                AggregateKey::User => transaction.user_id.clone(),
                AggregateKey::Day => transaction
                    .created_at
                    .to_offset(UtcOffset::UTC)
                    .date()
                    .to_string(),
            };

            let entry = groups.entry(key).or_default();
            entry.0 += i64::from(transaction.amount);
            entry.1 += 1;
            entry.2.insert(transaction.user_id.as_str());
        }

        Ok(groups
            .into_iter()
            .map(|(group_key, (total_amount, transaction_count, users))| AggregateRow {
                group_key,
                total_amount,
                transaction_count,
                distinct_users: users.len() as i64,
            })
            .collect())
    }
}

//! PostgreSQL ledger store built on sea-orm.
//!
//! Balance writes lock the user's row (`SELECT ... FOR UPDATE`) inside a database
//! transaction, so two concurrent deductions for the same user are serialized and
//! the second one sees the balance left by the first.

use super::{
    new_transaction, plan_balance_change, AggregateKey, AggregateRow, BalancePlan,
    CreditTransaction, LedgerReceipt, LedgerStore, LedgerWrite, Metadata, SubscriptionUpdate,
    TransactionQuery, TransactionScan, UserCreditRecord, INITIAL_GRANT_REASON,
};
use crate::error::{ApiError, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use entity::{
    credit_transactions,
    sea_orm_active_enums::{SubscriptionStatus, SubscriptionTier, TransactionType},
    user_credits,
};
use sea_orm::{
    entity::*, query::*, sea_query::{Expr, OnConflict, SimpleExpr}, DatabaseConnection,
    DatabaseTransaction, PaginatorTrait, Select, TransactionTrait,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

pub struct PostgresLedgerStore {
    db: DatabaseConnection,
}

impl PostgresLedgerStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Lock the user's row, plan the change, then update the balance and append
    /// the transaction. Dropping `txn` on an early return rolls it back.
    async fn apply_locked(&self, user_id: &str, write: &LedgerWrite) -> Result<LedgerReceipt> {
        let txn = self.db.begin().await?;

        let account = user_credits::Entity::find_by_id(user_id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(account) = account else {
            txn.rollback().await?;
            return Err(ApiError::UserNotFound(user_id.to_string()));
        };

        let plan = match plan_balance_change(account.credits, write) {
            Ok(plan) => plan,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        let now = OffsetDateTime::now_utc();
        let mut account_active: user_credits::ActiveModel = account.into();
        account_active.credits = Set(plan.new_balance);
        account_active.last_credit_update = Set(now);
        account_active.updated_at = Set(now);
        account_active.update(&txn).await?;

        let receipt = Self::insert_transaction(user_id, write, &plan, now, &txn).await?;

        txn.commit().await?;

        Ok(receipt)
    }

    async fn insert_transaction(
        user_id: &str,
        write: &LedgerWrite,
        plan: &BalancePlan,
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<LedgerReceipt> {
        let transaction = new_transaction(user_id, write, plan, now);
        let receipt = LedgerReceipt::from_transaction(&transaction, plan.applied_delta);

        let new_transaction = credit_transactions::ActiveModel {
            id: Set(transaction.id),
            user_id: Set(transaction.user_id),
            transaction_type: Set(transaction.transaction_type),
            amount: Set(transaction.amount),
            reason: Set(transaction.reason),
            balance_after: Set(transaction.balance_after),
            metadata: Set(transaction.metadata),
            created_at: Set(transaction.created_at),
        };

        credit_transactions::Entity::insert(new_transaction)
            .exec_without_returning(txn)
            .await?;

        Ok(receipt)
    }
}

/// Apply a [`TransactionScan`] to a transaction query
fn filtered(
    mut select: Select<credit_transactions::Entity>,
    scan: &TransactionScan,
) -> Select<credit_transactions::Entity> {
    if let Some(ref user_id) = scan.user_id {
        select = select.filter(credit_transactions::Column::UserId.eq(user_id.as_str()));
    }
    if let Some(kind) = scan.kind {
        select = select.filter(credit_transactions::Column::TransactionType.eq(kind));
    }
    if let Some(since) = scan.since {
        select = select.filter(credit_transactions::Column::CreatedAt.gte(since));
    }
    if let Some(until) = scan.until {
        select = select.filter(credit_transactions::Column::CreatedAt.lt(until));
    }
    select
}

fn group_expr(group_by: AggregateKey) -> SimpleExpr {
    match group_by {
        AggregateKey::TransactionType => Expr::cust("CAST(transaction_type AS TEXT)"),
        AggregateKey::User => Expr::cust("user_id"),
        AggregateKey::Day => Expr::cust("to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD')"),
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self))]
    async fn find_account(&self, user_id: &str) -> Result<Option<UserCreditRecord>> {
        let account = user_credits::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?;

        Ok(account)
    }

    #[instrument(skip(self))]
    async fn provision_account(
        &self,
        user_id: &str,
        initial_grant: i32,
    ) -> Result<UserCreditRecord> {
        let txn = self.db.begin().await?;
        let now = OffsetDateTime::now_utc();

        let write = LedgerWrite::addition(initial_grant, INITIAL_GRANT_REASON, Metadata::new());
        let plan = plan_balance_change(0, &write)?;

        let new_account = user_credits::ActiveModel {
            user_id: Set(user_id.to_string()),
            credits: Set(plan.new_balance),
            subscription_tier: Set(SubscriptionTier::Free),
            subscription_status: Set(SubscriptionStatus::Active),
            last_credit_update: Set(now),
            converted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // ON CONFLICT DO NOTHING: a concurrent first request may have won the insert
        let inserted = user_credits::Entity::insert(new_account)
            .on_conflict(
                OnConflict::column(user_credits::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if inserted == 1 && initial_grant > 0 {
            Self::insert_transaction(user_id, &write, &plan, now, &txn).await?;

            info!(
                "Provisioned credit record for user {} with {} credits",
                user_id, initial_grant
            );
        }

        let account = user_credits::Entity::find_by_id(user_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!(
                    "Failed to read credit record after provisioning user {}",
                    user_id
                ))
            })?;

        txn.commit().await?;

        Ok(account)
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, user_id: &str) -> Result<i32> {
        self.find_account(user_id)
            .await?
            .map(|account| account.credits)
            .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))
    }

    #[instrument(skip(self, write), fields(kind = ?write.kind, delta = write.delta))]
    async fn write_transaction_and_balance(
        &self,
        user_id: &str,
        write: LedgerWrite,
    ) -> Result<LedgerReceipt> {
        self.apply_locked(user_id, &write)
            .await
            .map_err(ApiError::into_transaction_failure)
    }

    #[instrument(skip(self))]
    async fn update_subscription(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<UserCreditRecord> {
        let txn = self.db.begin().await?;

        let account = user_credits::Entity::find_by_id(user_id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(account) = account else {
            txn.rollback().await?;
            return Err(ApiError::UserNotFound(user_id.to_string()));
        };

        let now = OffsetDateTime::now_utc();
        let annotation = if update.cancels(&account) {
            let write = update.cancellation_write(&account);
            match plan_balance_change(account.credits, &write) {
                Ok(plan) => Some((write, plan)),
                Err(e) => {
                    txn.rollback().await?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let first_conversion = account.converted_at.is_none()
            && update
                .tier
                .is_some_and(|tier| tier != SubscriptionTier::Free);

        let mut account_active: user_credits::ActiveModel = account.into();
        if let Some(tier) = update.tier {
            account_active.subscription_tier = Set(tier);
        }
        if let Some(status) = update.status {
            account_active.subscription_status = Set(status);
        }
        if first_conversion {
            account_active.converted_at = Set(Some(now));
        }
        account_active.updated_at = Set(now);

        let updated = account_active.update(&txn).await?;

        if let Some((write, plan)) = annotation {
            Self::insert_transaction(user_id, &write, &plan, now, &txn).await?;
        }

        txn.commit().await?;

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        user_id: &str,
        query: TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        let mut select = credit_transactions::Entity::find()
            .filter(credit_transactions::Column::UserId.eq(user_id));

        if let Some(kind) = query.kind {
            select = select.filter(credit_transactions::Column::TransactionType.eq(kind));
        }

        // id breaks created_at ties so page boundaries are stable
        let transactions = select
            .order_by_desc(credit_transactions::Column::CreatedAt)
            .order_by_desc(credit_transactions::Column::Id)
            .offset(query.offset)
            .limit(query.limit)
            .all(&self.db)
            .await?;

        Ok(transactions)
    }

    async fn count_transactions(
        &self,
        user_id: &str,
        kind: Option<TransactionType>,
    ) -> Result<u64> {
        let mut select = credit_transactions::Entity::find()
            .filter(credit_transactions::Column::UserId.eq(user_id));

        if let Some(kind) = kind {
            select = select.filter(credit_transactions::Column::TransactionType.eq(kind));
        }

        Ok(select.count(&self.db).await?)
    }

    #[instrument(skip(self))]
    async fn signed_transaction_total(&self, user_id: &str) -> Result<i64> {
        let total = credit_transactions::Entity::find()
            .filter(credit_transactions::Column::UserId.eq(user_id))
            .select_only()
            .column_as(
                Expr::cust(
                    "COALESCE(SUM(CASE WHEN transaction_type = 'deduction' \
                     THEN -amount ELSE amount END), 0)",
                ),
                "signed_total",
            )
            .into_tuple::<i64>()
            .one(&self.db)
            .await?
            .unwrap_or(0);

        Ok(total)
    }

    async fn list_accounts(&self) -> Result<Vec<UserCreditRecord>> {
        let accounts = user_credits::Entity::find()
            .order_by_asc(user_credits::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(accounts)
    }

    #[instrument(skip(self))]
    async fn scan_transactions(&self, scan: TransactionScan) -> Result<Vec<CreditTransaction>> {
        let transactions = filtered(credit_transactions::Entity::find(), &scan)
            .order_by_asc(credit_transactions::Column::CreatedAt)
            .order_by_asc(credit_transactions::Column::Id)
            .all(&self.db)
            .await?;

        Ok(transactions)
    }

    #[instrument(skip(self))]
    async fn aggregate_across_users(
        &self,
        scan: TransactionScan,
        group_by: AggregateKey,
    ) -> Result<Vec<AggregateRow>> {
        let key = group_expr(group_by);

        let rows = filtered(credit_transactions::Entity::find(), &scan)
            .select_only()
            .column_as(key.clone(), "group_key")
            .column_as(Expr::cust("COALESCE(SUM(amount), 0)"), "total_amount")
            .column_as(Expr::cust("COUNT(*)"), "transaction_count")
            .column_as(Expr::cust("COUNT(DISTINCT user_id)"), "distinct_users")
            .group_by(key.clone())
            .order_by_asc(key)
            .into_model::<AggregateRow>()
            .all(&self.db)
            .await?;

        Ok(rows)
    }
}

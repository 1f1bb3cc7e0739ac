use crate::state_with_store;
use async_trait::async_trait;
use entity::sea_orm_active_enums::{SubscriptionStatus, TransactionType};
use resume_ledger::{
    config::CreditsConfig,
    middleware::credit_guard::{
        CreditCheck, CreditGuard, DeductionStatus, MeteredRequest,
    },
    services::CreditService,
    store::{
        AggregateKey, AggregateRow, CreditTransaction, LedgerReceipt, LedgerStore, LedgerWrite,
        MemoryLedgerStore, SubscriptionUpdate, TransactionQuery, TransactionScan,
        UserCreditRecord, SUBSCRIPTION_CANCELLED_REASON,
    },
    ApiError, Result,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Memory store whose writes can be made to fail on demand
#[derive(Default)]
struct FlakyStore {
    inner: MemoryLedgerStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::TransactionFailed(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn find_account(&self, user_id: &str) -> Result<Option<UserCreditRecord>> {
        self.inner.find_account(user_id).await
    }

    async fn provision_account(
        &self,
        user_id: &str,
        initial_grant: i32,
    ) -> Result<UserCreditRecord> {
        self.inner.provision_account(user_id, initial_grant).await
    }

    async fn get_balance(&self, user_id: &str) -> Result<i32> {
        self.inner.get_balance(user_id).await
    }

    async fn write_transaction_and_balance(
        &self,
        user_id: &str,
        write: LedgerWrite,
    ) -> Result<LedgerReceipt> {
        self.check_writes()?;
        self.inner.write_transaction_and_balance(user_id, write).await
    }

    async fn update_subscription(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<UserCreditRecord> {
        self.check_writes()?;
        self.inner.update_subscription(user_id, update).await
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        query: TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        self.inner.list_transactions(user_id, query).await
    }

    async fn count_transactions(
        &self,
        user_id: &str,
        kind: Option<TransactionType>,
    ) -> Result<u64> {
        self.inner.count_transactions(user_id, kind).await
    }

    async fn signed_transaction_total(&self, user_id: &str) -> Result<i64> {
        self.inner.signed_transaction_total(user_id).await
    }

    async fn list_accounts(&self) -> Result<Vec<UserCreditRecord>> {
        self.inner.list_accounts().await
    }

    async fn scan_transactions(&self, scan: TransactionScan) -> Result<Vec<CreditTransaction>> {
        self.inner.scan_transactions(scan).await
    }

    async fn aggregate_across_users(
        &self,
        scan: TransactionScan,
        group_by: AggregateKey,
    ) -> Result<Vec<AggregateRow>> {
        self.inner.aggregate_across_users(scan, group_by).await
    }
}

fn guard_over(store: Arc<dyn LedgerStore>) -> (CreditGuard, Arc<CreditService>) {
    let service = Arc::new(CreditService::new(store, CreditsConfig::default()));
    (CreditGuard::new(service.clone()), service)
}

#[tokio::test]
async fn test_validate_credits_does_not_mutate() {
    let store = Arc::new(MemoryLedgerStore::new());
    let (guard, _) = guard_over(store.clone());

    assert_eq!(
        guard.validate_credits("user_v", 5).await.unwrap(),
        CreditCheck::Sufficient { balance: 200 }
    );
    assert_eq!(
        guard.validate_credits("user_v", 201).await.unwrap(),
        CreditCheck::Insufficient {
            current_balance: 200,
            required_credits: 201
        }
    );
    assert_eq!(store.get_balance("user_v").await.unwrap(), 200);
    assert_eq!(store.count_transactions("user_v", None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insufficient_balance_never_runs_operation() {
    let store = Arc::new(MemoryLedgerStore::new());
    let (guard, service) = guard_over(store.clone());
    service
        .get_user_credits("user_poor")
        .await
        .unwrap();
    service
        .adjust_user_credits("user_poor", -197, "drain", "admin")
        .await
        .unwrap();

    let ran = AtomicBool::new(false);
    let result = guard
        .run(MeteredRequest::new("user_poor", 5, "AI request"), || async {
            ran.store(true, Ordering::SeqCst);
            Ok("generated")
        })
        .await;

    match result {
        Err(ApiError::InsufficientCredits {
            current_balance,
            required_credits,
        }) => {
            assert_eq!(current_balance, 3);
            assert_eq!(required_credits, 5);
        }
        other => panic!("Expected InsufficientCredits, got {:?}", other),
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(store.get_balance("user_poor").await.unwrap(), 3);
}

#[tokio::test]
async fn test_success_deducts_exactly_once() {
    let store = Arc::new(MemoryLedgerStore::new());
    let (guard, _) = guard_over(store.clone());
    let calls = AtomicUsize::new(0);

    let guarded = guard
        .run(
            MeteredRequest::new("user_ok", 5, "AI request").with_metadata("endpoint", "/test"),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
        )
        .await
        .unwrap();

    assert_eq!(guarded.output, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match guarded.deduction {
        DeductionStatus::Deducted(receipt) => assert_eq!(receipt.new_balance, 195),
        other => panic!("Expected a deduction, got {:?}", other),
    }
    assert_eq!(
        store
            .count_transactions("user_ok", Some(TransactionType::Deduction))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_failed_operation_is_not_charged() {
    let store = Arc::new(MemoryLedgerStore::new());
    let (guard, _) = guard_over(store.clone());

    let result: Result<_> = guard
        .run(MeteredRequest::new("user_fail", 5, "AI request"), || async {
            Err::<String, _>(ApiError::AIProvider("upstream timeout".to_string()))
        })
        .await;

    assert!(matches!(result, Err(ApiError::AIProvider(_))));
    assert_eq!(store.get_balance("user_fail").await.unwrap(), 200);
    assert_eq!(
        store
            .count_transactions("user_fail", Some(TransactionType::Deduction))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_failed_deduction_still_returns_output() {
    let store = Arc::new(FlakyStore::default());
    let (guard, service) = guard_over(store.clone());
    service.get_user_credits("user_flaky").await.unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let guarded = guard
        .run(MeteredRequest::new("user_flaky", 5, "AI request"), || async {
            Ok("polished bullet".to_string())
        })
        .await
        .unwrap();

    assert_eq!(guarded.output, "polished bullet");
    assert!(matches!(guarded.deduction, DeductionStatus::Failed { .. }));
    assert_eq!(store.get_balance("user_flaky").await.unwrap(), 200);
}

#[tokio::test]
async fn test_app_state_accepts_custom_store() {
    let store = Arc::new(FlakyStore::default());
    let state = state_with_store("http://127.0.0.1:9", store);

    let check = state.credit_guard.validate_credits("user_state", 5).await.unwrap();
    assert_eq!(check, CreditCheck::Sufficient { balance: 200 });
}

#[tokio::test]
async fn test_failed_cancellation_commits_nothing() {
    let store = Arc::new(FlakyStore::default());
    let (_, service) = guard_over(store.clone());
    service.get_user_credits("user_cancel").await.unwrap();

    let cancel = || SubscriptionUpdate {
        tier: None,
        status: Some(SubscriptionStatus::Cancelled),
    };

    store.fail_writes.store(true, Ordering::SeqCst);
    let err = service
        .update_user_subscription("user_cancel", cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::TransactionFailed(_)));

    let account = store.find_account("user_cancel").await.unwrap().unwrap();
    assert_eq!(account.subscription_status, SubscriptionStatus::Active);
    assert_eq!(store.count_transactions("user_cancel", None).await.unwrap(), 1);

    // Retry lands both the status change and its log entry
    store.fail_writes.store(false, Ordering::SeqCst);
    let account = service
        .update_user_subscription("user_cancel", cancel())
        .await
        .unwrap();
    assert_eq!(account.subscription_status, SubscriptionStatus::Cancelled);

    // Cancelling an already cancelled subscription logs nothing new
    service
        .update_user_subscription("user_cancel", cancel())
        .await
        .unwrap();

    let history = store
        .list_transactions(
            "user_cancel",
            TransactionQuery {
                limit: 10,
                offset: 0,
                kind: None,
            },
        )
        .await
        .unwrap();
    let reasons: Vec<_> = history.iter().map(|t| t.reason.as_str()).collect();
    assert_eq!(reasons, [SUBSCRIPTION_CANCELLED_REASON, "Initial credit grant"]);
    assert_eq!(history[0].amount, 0);
    assert_eq!(history[0].balance_after, 200);
}

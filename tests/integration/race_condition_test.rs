/// Concurrent deductions against one user must serialize on the balance:
/// no double-spend, no lost update, no negative balance.
use crate::{account, logged, setup_test_db};
use entity::sea_orm_active_enums::{SubscriptionStatus, TransactionType};
use resume_ledger::{
    config::CreditsConfig,
    services::CreditService,
    store::{
        LedgerStore, MemoryLedgerStore, PostgresLedgerStore, SubscriptionUpdate,
        SUBSCRIPTION_CANCELLED_REASON,
    },
    ApiError,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::{sync::Barrier, task::JoinSet};
use uuid::Uuid;

fn seeded_store(user_id: &str, balance: i32) -> Arc<MemoryLedgerStore> {
    let now = OffsetDateTime::now_utc();
    Arc::new(MemoryLedgerStore::seeded(
        [account(user_id, balance, now)],
        [logged(user_id, TransactionType::Addition, balance, balance, now)],
    ))
}

/// Tally of (successes, insufficient-credit rejections, other errors)
async fn race_deductions(
    service: Arc<CreditService>,
    user_id: &str,
    tasks: usize,
    amount: i32,
) -> (usize, usize, usize) {
    let barrier = Arc::new(Barrier::new(tasks));
    let mut set = JoinSet::new();

    for _ in 0..tasks {
        let service = service.clone();
        let barrier = barrier.clone();
        let user_id = user_id.to_string();

        set.spawn(async move {
            barrier.wait().await;
            service
                .atomic_deduct_credits(&user_id, amount, "AI request", None)
                .await
        });
    }

    let mut success_count = 0;
    let mut insufficient_count = 0;
    let mut other_error_count = 0;

    while let Some(result) = set.join_next().await {
        match result {
            Ok(Ok(_)) => success_count += 1,
            Ok(Err(ApiError::InsufficientCredits { .. })) => insufficient_count += 1,
            Ok(Err(e)) => {
                println!("Unexpected error: {}", e);
                other_error_count += 1;
            }
            Err(e) => {
                println!("Task panicked: {:?}", e);
                other_error_count += 1;
            }
        }
    }

    (success_count, insufficient_count, other_error_count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_deductions_exceeding_balance() {
    let store = seeded_store("user_race", 10);
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let (success, insufficient, other) = race_deductions(service.clone(), "user_race", 2, 6).await;

    assert_eq!(success, 1, "Exactly one deduction should win");
    assert_eq!(insufficient, 1, "The other should see InsufficientCredits");
    assert_eq!(other, 0);

    assert_eq!(store.get_balance("user_race").await.unwrap(), 4);
    assert_eq!(
        store
            .count_transactions("user_race", Some(TransactionType::Deduction))
            .await
            .unwrap(),
        1
    );
    assert!(service
        .validate_balance_consistency("user_race")
        .await
        .unwrap()
        .is_consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_deductions_drain_exactly() {
    let store = seeded_store("user_burst", 200);
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let (success, insufficient, other) = race_deductions(service, "user_burst", 50, 5).await;

    assert_eq!(success, 40);
    assert_eq!(insufficient, 10);
    assert_eq!(other, 0);
    assert_eq!(store.get_balance("user_burst").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_contact_provisions_once() {
    let store = Arc::new(MemoryLedgerStore::new());
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let reads = (0..8).map(|_| {
        let service = service.clone();
        async move { service.get_user_credits("user_fresh").await }
    });
    let balances = futures::future::join_all(reads).await;

    assert!(balances.iter().all(|b| matches!(b, Ok(200))));
    assert_eq!(store.count_transactions("user_fresh", None).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_annotate_once() {
    let store = seeded_store("user_cancel_race", 50);
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let tasks = 8;
    let barrier = Arc::new(Barrier::new(tasks));
    let mut set = JoinSet::new();
    for _ in 0..tasks {
        let service = service.clone();
        let barrier = barrier.clone();
        set.spawn(async move {
            barrier.wait().await;
            service
                .update_user_subscription(
                    "user_cancel_race",
                    SubscriptionUpdate {
                        tier: None,
                        status: Some(SubscriptionStatus::Cancelled),
                    },
                )
                .await
        });
    }
    while let Some(result) = set.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    let annotations = store
        .scan_transactions(Default::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.reason == SUBSCRIPTION_CANCELLED_REASON)
        .count();
    assert_eq!(annotations, 1);
    assert_eq!(store.get_balance("user_cancel_race").await.unwrap(), 50);
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn test_postgres_concurrent_deductions() {
    let db = setup_test_db().await;
    let store: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(db));
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let user_id = format!("test-user-{}", Uuid::new_v4());
    service.get_user_credits(&user_id).await.unwrap();
    service
        .adjust_user_credits(&user_id, -190, "set up race", "test")
        .await
        .unwrap();

    let (success, insufficient, other) = race_deductions(service.clone(), &user_id, 2, 6).await;

    assert_eq!(success, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(other, 0);
    assert_eq!(store.get_balance(&user_id).await.unwrap(), 4);
    assert!(service
        .validate_balance_consistency(&user_id)
        .await
        .unwrap()
        .is_consistent);
}

#[tokio::test]
#[ignore] // Run only when database is available
async fn test_postgres_concurrent_provisioning() {
    let db = setup_test_db().await;
    let store: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(db));
    let service = Arc::new(CreditService::new(store.clone(), CreditsConfig::default()));

    let user_id = format!("test-user-{}", Uuid::new_v4());
    let reads = (0..5).map(|_| {
        let service = service.clone();
        let user_id = user_id.clone();
        async move { service.get_user_credits(&user_id).await }
    });

    for balance in futures::future::join_all(reads).await {
        assert_eq!(balance.unwrap(), 200);
    }
    assert_eq!(store.count_transactions(&user_id, None).await.unwrap(), 1);
}

use crate::{
    config::AnalyticsConfig,
    error::{ApiError, Result},
    models::admin::{ConsumptionPattern, ConversionReport, SystemStats, UsageAlert},
    services::analytics,
    store::{AggregateKey, LedgerStore, TransactionScan},
};
use entity::sea_orm_active_enums::TransactionType;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument};

/// Read-only reporting over the ledger. Tolerates slightly stale data.
pub struct AdminService {
    store: Arc<dyn LedgerStore>,
    config: AnalyticsConfig,
}

impl AdminService {
    pub fn new(store: Arc<dyn LedgerStore>, config: AnalyticsConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self))]
    pub async fn get_system_stats(&self) -> Result<SystemStats> {
        let since = OffsetDateTime::now_utc() - Duration::hours(24);

        let accounts = self.store.list_accounts().await?;
        let by_type = self
            .store
            .aggregate_across_users(TransactionScan::all(), AggregateKey::TransactionType)
            .await?;
        let last_24h = self
            .store
            .aggregate_across_users(TransactionScan::all().since(since), AggregateKey::User)
            .await?;

        Ok(analytics::system_stats(&accounts, &by_type, &last_24h))
    }

    #[instrument(skip(self))]
    pub async fn get_consumption_pattern(&self, user_id: &str) -> Result<ConsumptionPattern> {
        if self.store.find_account(user_id).await?.is_none() {
            return Err(ApiError::UserNotFound(user_id.to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let since = now - Duration::days(self.config.pattern_window_days.max(1));

        let deductions = self
            .store
            .scan_transactions(
                TransactionScan::all()
                    .for_user(user_id)
                    .of_kind(TransactionType::Deduction)
                    .since(since),
            )
            .await?;

        Ok(analytics::consumption_pattern(
            user_id,
            &deductions,
            now,
            &self.config,
        ))
    }

    #[instrument(skip(self))]
    pub async fn get_conversion_report(&self) -> Result<ConversionReport> {
        let accounts = self.store.list_accounts().await?;
        Ok(analytics::conversion_report(
            &accounts,
            OffsetDateTime::now_utc(),
        ))
    }

    #[instrument(skip(self))]
    pub async fn generate_usage_alerts(&self) -> Result<Vec<UsageAlert>> {
        let now = OffsetDateTime::now_utc();
        let since = now - Duration::days(self.config.alert_lookback_days.max(1));

        let deductions = self
            .store
            .scan_transactions(
                TransactionScan::all()
                    .of_kind(TransactionType::Deduction)
                    .since(since),
            )
            .await?;

        let alerts = analytics::detect_usage_alerts(&deductions, now, &self.config);
        if !alerts.is_empty() {
            info!("Generated {} usage alerts", alerts.len());
        }

        Ok(alerts)
    }
}

use crate::{
    config::{Config, StorageBackend},
    middleware::CreditGuard,
    services::{AIService, AdminService, CreditService, JWTService},
    store::{LedgerStore, MemoryLedgerStore, PostgresLedgerStore},
};
use migration::{Migrator, MigratorTrait};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub credit_service: Arc<CreditService>,
    pub credit_guard: Arc<CreditGuard>,
    pub admin_service: Arc<AdminService>,
    pub ai_service: Arc<AIService>,
    pub jwt_service: Arc<JWTService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn LedgerStore> = match config.database.backend {
            StorageBackend::Postgres => {
                let db = sea_orm::Database::connect(&config.database.url).await?;

                if config.database.run_migrations {
                    Migrator::up(&db, None).await?;
                    tracing::info!("Applied pending migrations");
                }

                Arc::new(PostgresLedgerStore::new(db))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using the in-memory ledger store, balances will not survive a restart");
                Arc::new(MemoryLedgerStore::new())
            }
        };

        Self::with_store(config, store)
    }

    /// Build the services around an existing store
    pub fn with_store(config: Config, store: Arc<dyn LedgerStore>) -> Result<Self, anyhow::Error> {
        let credit_service = Arc::new(CreditService::new(store.clone(), config.credits.clone()));
        let credit_guard = Arc::new(CreditGuard::new(credit_service.clone()));
        let admin_service = Arc::new(AdminService::new(store.clone(), config.analytics.clone()));
        let ai_service = Arc::new(AIService::new(&config.ai)?);
        let jwt_service = Arc::new(JWTService::new(Arc::new(config.auth.clone())));

        Ok(Self {
            credit_service,
            credit_guard,
            admin_service,
            ai_service,
            jwt_service,
            config: Arc::new(config),
        })
    }
}

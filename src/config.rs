use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub ai: AIConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Which ledger store backs the credit service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Single-process and not durable; local development and tests only
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AIConfig {
    pub openrouter: OpenRouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub app_title: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retries on 5xx, 429 and transport errors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first request
    pub attempts: u8,
    /// Retry `n` waits `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self, attempt: u8) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_ms * u64::from(attempt))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreditsConfig {
    /// Balance granted when a user record is first provisioned
    pub default_grant: i32,
    /// Flat price of one metered AI call
    pub ai_request_cost: i32,
    /// Largest magnitude an admin may adjust in a single call
    pub max_admin_adjustment: i32,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            default_grant: 200,
            ai_request_cost: 5,
            max_admin_adjustment: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub pattern_window_days: i64,
    pub high_usage_daily_threshold: f64,
    pub unusual_variation_ratio: f64,
    pub alert_lookback_days: i64,
    pub spike_ratio: f64,
    pub spike_min_history_days: usize,
    pub spike_min_daily_spend: i64,
    pub abuse_spend_threshold: i64,
    pub abuse_transaction_threshold: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            pattern_window_days: 30,
            high_usage_daily_threshold: 50.0,
            unusual_variation_ratio: 1.5,
            alert_lookback_days: 7,
            spike_ratio: 3.0,
            spike_min_history_days: 2,
            spike_min_daily_spend: 20,
            abuse_spend_threshold: 500,
            abuse_transaction_threshold: 100,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            // RESUME_LEDGER__DATABASE__URL=... overrides database.url
            .add_source(
                config::Environment::with_prefix("RESUME_LEDGER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.admin_user_ids")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

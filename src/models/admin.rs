use entity::sea_orm_active_enums::SubscriptionTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// System-wide ledger totals
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_users: u64,
    pub total_credits_in_circulation: i64,
    pub total_credits_earned: i64,
    pub total_credits_spent: i64,
    pub total_credits_refunded: i64,
    pub average_credits_per_user: f64,
    pub tier_distribution: BTreeMap<String, u64>,
    pub transactions_last_24h: i64,
    pub active_users_last_24h: i64,
}

/// Spending profile of one user over the trailing analysis window
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionPattern {
    pub user_id: String,
    pub window_days: i64,
    pub total_spent: i64,
    pub daily_average: f64,
    pub weekly_average: f64,
    pub monthly_average: f64,
    /// UTC hour (0-23) with the most deductions
    pub peak_usage_hour: Option<u8>,
    pub most_used_endpoint: Option<String>,
    pub spend_std_deviation: f64,
    pub is_high_usage: bool,
    pub is_unusual_pattern: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierBreakdown {
    pub tier: SubscriptionTier,
    pub users: u64,
    pub percentage: f64,
}

/// Free-to-paid funnel
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    pub total_users: u64,
    pub free_users: u64,
    pub paid_users: u64,
    pub conversion_rate: f64,
    pub conversions_this_month: u64,
    pub conversions_last_month: u64,
    pub trend: ConversionTrend,
    pub average_days_to_conversion: Option<f64>,
    pub tier_breakdown: Vec<TierBreakdown>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UnusualSpike,
    PotentialAbuse,
}

/// Ordered from least to most severe
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

/// Generated on demand from recent transactions; never stored
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub user_id: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: time::OffsetDateTime,
}

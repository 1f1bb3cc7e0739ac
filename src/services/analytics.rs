//! Pure aggregations behind the admin reports.
//!
//! Everything here works on records already fetched from the ledger store and
//! takes `now` explicitly, so the numbers can be checked against synthetic logs.

use crate::{
    config::AnalyticsConfig,
    models::{
        admin::{
            AlertSeverity, AlertType, ConsumptionPattern, ConversionReport, ConversionTrend,
            SystemStats, TierBreakdown, UsageAlert,
        },
        ledger_ext::{SubscriptionTierExt, TransactionTypeExt},
    },
    store::{AggregateRow, CreditTransaction, UserCreditRecord},
};
use entity::sea_orm_active_enums::{SubscriptionTier, TransactionType};
use serde_json::json;
use std::collections::BTreeMap;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

const ALL_TIERS: [SubscriptionTier; 4] = [
    SubscriptionTier::Free,
    SubscriptionTier::Basic,
    SubscriptionTier::Premium,
    SubscriptionTier::Enterprise,
];

/// `by_type` is grouped by transaction type over the whole log, `last_24h`
/// by user over the trailing day.
pub fn system_stats(
    accounts: &[UserCreditRecord],
    by_type: &[AggregateRow],
    last_24h: &[AggregateRow],
) -> SystemStats {
    let total_users = accounts.len() as u64;
    let total_credits_in_circulation: i64 =
        accounts.iter().map(|a| i64::from(a.credits)).sum();

    let total_for = |kind: TransactionType| {
        by_type
            .iter()
            .filter(|row| row.group_key == kind.as_str())
            .map(|row| row.total_amount)
            .sum::<i64>()
    };

    let mut tier_distribution: BTreeMap<String, u64> = ALL_TIERS
        .iter()
        .map(|tier| (tier.as_str().to_string(), 0))
        .collect();
    for account in accounts {
        *tier_distribution
            .entry(account.subscription_tier.as_str().to_string())
            .or_default() += 1;
    }

    let average_credits_per_user = if total_users == 0 {
        0.0
    } else {
        total_credits_in_circulation as f64 / total_users as f64
    };

    SystemStats {
        total_users,
        total_credits_in_circulation,
        total_credits_earned: total_for(TransactionType::Addition),
        total_credits_spent: total_for(TransactionType::Deduction),
        total_credits_refunded: total_for(TransactionType::Refund),
        average_credits_per_user,
        tier_distribution,
        transactions_last_24h: last_24h.iter().map(|row| row.transaction_count).sum(),
        active_users_last_24h: last_24h.len() as i64,
    }
}

/// Spending profile over the `pattern_window_days` ending at `now`.
/// Only deductions inside the window are counted.
pub fn consumption_pattern(
    user_id: &str,
    transactions: &[CreditTransaction],
    now: OffsetDateTime,
    config: &AnalyticsConfig,
) -> ConsumptionPattern {
    let window_days = config.pattern_window_days.max(1);
    let window_start = now - Duration::days(window_days);

    let deductions: Vec<&CreditTransaction> = transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Deduction)
        .filter(|t| t.created_at >= window_start && t.created_at <= now)
        .collect();

    let total_spent: i64 = deductions.iter().map(|t| i64::from(t.amount)).sum();
    let daily_average = total_spent as f64 / window_days as f64;

    // Zero days count toward the deviation
    let mut daily = vec![0i64; window_days as usize];
    let mut by_hour = [0u32; 24];
    let mut by_endpoint: BTreeMap<&str, u32> = BTreeMap::new();

    for transaction in &deductions {
        let index = (transaction.created_at - window_start)
            .whole_days()
            .clamp(0, window_days - 1) as usize;
        daily[index] += i64::from(transaction.amount);

        by_hour[transaction.created_at.to_offset(UtcOffset::UTC).hour() as usize] += 1;

        if let Some(endpoint) = transaction.metadata.get("endpoint").and_then(|v| v.as_str()) {
            *by_endpoint.entry(endpoint).or_default() += 1;
        }
    }

    let variance = daily
        .iter()
        .map(|&day| (day as f64 - daily_average).powi(2))
        .sum::<f64>()
        / window_days as f64;
    let spend_std_deviation = variance.sqrt();

    let peak_usage_hour = if deductions.is_empty() {
        None
    } else {
        most_frequent(by_hour.iter().enumerate().map(|(hour, &n)| (hour as u8, n)))
    };
    let most_used_endpoint =
        most_frequent(by_endpoint.into_iter()).map(|endpoint| endpoint.to_string());

    let is_unusual_pattern =
        daily_average > 0.0 && spend_std_deviation / daily_average > config.unusual_variation_ratio;

    ConsumptionPattern {
        user_id: user_id.to_string(),
        window_days,
        total_spent,
        daily_average,
        weekly_average: daily_average * 7.0,
        monthly_average: daily_average * 30.0,
        peak_usage_hour,
        most_used_endpoint,
        spend_std_deviation,
        is_high_usage: daily_average > config.high_usage_daily_threshold,
        is_unusual_pattern,
    }
}

/// First key with the highest non-zero count
fn most_frequent<K>(counts: impl Iterator<Item = (K, u32)>) -> Option<K> {
    let mut best: Option<(K, u32)> = None;
    for (key, count) in counts {
        if count > best.as_ref().map_or(0, |(_, n)| *n) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key)
}

fn month_start(date: Date) -> Date {
    date - Duration::days(i64::from(date.day()) - 1)
}

pub fn conversion_report(accounts: &[UserCreditRecord], now: OffsetDateTime) -> ConversionReport {
    let total_users = accounts.len() as u64;
    let paid_users = accounts
        .iter()
        .filter(|a| a.subscription_tier.is_paid())
        .count() as u64;

    let this_month = month_start(now.to_offset(UtcOffset::UTC).date());
    let last_month = month_start(this_month - Duration::days(1));
    let this_month_start = this_month.midnight().assume_utc();
    let last_month_start = last_month.midnight().assume_utc();

    let mut conversions_this_month = 0u64;
    let mut conversions_last_month = 0u64;
    let mut conversion_days = Vec::new();

    for account in accounts {
        let Some(converted_at) = account.converted_at else {
            continue;
        };

        if converted_at >= this_month_start {
            conversions_this_month += 1;
        } else if converted_at >= last_month_start {
            conversions_last_month += 1;
        }

        conversion_days.push((converted_at - account.created_at).as_seconds_f64() / 86_400.0);
    }

    let trend = match conversions_this_month.cmp(&conversions_last_month) {
        std::cmp::Ordering::Greater => ConversionTrend::Increasing,
        std::cmp::Ordering::Less => ConversionTrend::Decreasing,
        std::cmp::Ordering::Equal => ConversionTrend::Stable,
    };

    let average_days_to_conversion = if conversion_days.is_empty() {
        None
    } else {
        Some(conversion_days.iter().sum::<f64>() / conversion_days.len() as f64)
    };

    let percentage = |n: u64| {
        if total_users == 0 {
            0.0
        } else {
            n as f64 * 100.0 / total_users as f64
        }
    };

    let tier_breakdown = ALL_TIERS
        .iter()
        .map(|&tier| {
            let users = accounts
                .iter()
                .filter(|a| a.subscription_tier == tier)
                .count() as u64;
            TierBreakdown {
                tier,
                users,
                percentage: percentage(users),
            }
        })
        .collect();

    ConversionReport {
        total_users,
        free_users: total_users - paid_users,
        paid_users,
        conversion_rate: percentage(paid_users),
        conversions_this_month,
        conversions_last_month,
        trend,
        average_days_to_conversion,
        tier_breakdown,
    }
}

/// Spike and abuse detection over recent deductions, most severe first
pub fn detect_usage_alerts(
    transactions: &[CreditTransaction],
    now: OffsetDateTime,
    config: &AnalyticsConfig,
) -> Vec<UsageAlert> {
    let lookback_start = now - Duration::days(config.alert_lookback_days.max(1));
    let abuse_start = now - Duration::hours(24);

    let mut by_user: BTreeMap<&str, Vec<&CreditTransaction>> = BTreeMap::new();
    for transaction in transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Deduction)
        .filter(|t| t.created_at >= lookback_start && t.created_at <= now)
    {
        by_user
            .entry(transaction.user_id.as_str())
            .or_default()
            .push(transaction);
    }

    let mut alerts = Vec::new();
    for (user_id, deductions) in by_user {
        if let Some(alert) = spike_alert(user_id, &deductions, now, config) {
            alerts.push(alert);
        }
        if let Some(alert) = abuse_alert(user_id, &deductions, abuse_start, now, config) {
            alerts.push(alert);
        }
    }

    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
    alerts
}

fn spike_alert(
    user_id: &str,
    deductions: &[&CreditTransaction],
    now: OffsetDateTime,
    config: &AnalyticsConfig,
) -> Option<UsageAlert> {
    let mut daily: BTreeMap<Date, i64> = BTreeMap::new();
    for transaction in deductions {
        *daily
            .entry(transaction.created_at.to_offset(UtcOffset::UTC).date())
            .or_default() += i64::from(transaction.amount);
    }

    let (&latest_day, &latest_total) = daily.iter().next_back()?;
    let prior: Vec<i64> = daily
        .range(..latest_day)
        .map(|(_, &total)| total)
        .collect();

    if prior.len() < config.spike_min_history_days || latest_total < config.spike_min_daily_spend {
        return None;
    }

    let baseline = prior.iter().sum::<i64>() as f64 / prior.len() as f64;
    if baseline <= 0.0 {
        return None;
    }

    let ratio = latest_total as f64 / baseline;
    if ratio < config.spike_ratio {
        return None;
    }

    let severity = if ratio >= config.spike_ratio * 2.0 {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    };

    Some(UsageAlert {
        alert_type: AlertType::UnusualSpike,
        severity,
        user_id: user_id.to_string(),
        message: format!(
            "Spent {} credits on {}, {:.1}x the recent daily average of {:.1}",
            latest_total, latest_day, ratio, baseline
        ),
        details: json!({
            "day": latest_day.to_string(),
            "dayTotal": latest_total,
            "baselineAverage": baseline,
            "ratio": ratio,
            "priorActiveDays": prior.len(),
        }),
        detected_at: now,
    })
}

fn abuse_alert(
    user_id: &str,
    deductions: &[&CreditTransaction],
    since: OffsetDateTime,
    now: OffsetDateTime,
    config: &AnalyticsConfig,
) -> Option<UsageAlert> {
    let recent: Vec<_> = deductions.iter().filter(|t| t.created_at >= since).collect();
    let spent: i64 = recent.iter().map(|t| i64::from(t.amount)).sum();
    let count = recent.len();

    let spend_exceeded = spent > config.abuse_spend_threshold;
    let count_exceeded = count > config.abuse_transaction_threshold;

    let severity = match (spend_exceeded, count_exceeded) {
        (true, true) => AlertSeverity::Critical,
        (true, false) | (false, true) => AlertSeverity::High,
        (false, false) => return None,
    };

    Some(UsageAlert {
        alert_type: AlertType::PotentialAbuse,
        severity,
        user_id: user_id.to_string(),
        message: format!(
            "{} credits across {} requests in the last 24 hours",
            spent, count
        ),
        details: json!({
            "spentLast24h": spent,
            "transactionsLast24h": count,
            "spendThreshold": config.abuse_spend_threshold,
            "transactionThreshold": config.abuse_transaction_threshold,
        }),
        detected_at: now,
    })
}

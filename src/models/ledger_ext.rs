//! Extension methods for the ledger's active enums
//!
//! The enums themselves are generated in entity/src/sea_orm_active_enums.rs;
//! the string and classification helpers the services need live here.

use entity::sea_orm_active_enums::{SubscriptionTier, TransactionType};

pub trait SubscriptionTierExt {
    fn as_str(&self) -> &'static str;

    /// Any tier above free counts as a paid conversion
    fn is_paid(&self) -> bool;
}

impl SubscriptionTierExt for SubscriptionTier {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }

    fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

pub trait TransactionTypeExt {
    fn as_str(&self) -> &'static str;

    /// Apply the sign this kind of transaction carries in the balance
    fn signed(&self, amount: i32) -> i64;
}

impl TransactionTypeExt for TransactionType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Addition => "addition",
            Self::Deduction => "deduction",
            Self::Refund => "refund",
        }
    }

    fn signed(&self, amount: i32) -> i64 {
        match self {
            Self::Deduction => -i64::from(amount),
            Self::Addition | Self::Refund => i64::from(amount),
        }
    }
}

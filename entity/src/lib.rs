//! sea-orm entities for the credit ledger tables.

pub mod prelude;

pub mod credit_transactions;
pub mod sea_orm_active_enums;
pub mod user_credits;

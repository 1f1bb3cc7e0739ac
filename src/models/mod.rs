// Request/Response models
pub mod admin;
pub mod ai;
pub mod common;
pub mod credits;
pub mod ledger_ext; // Extension methods for entity::sea_orm_active_enums

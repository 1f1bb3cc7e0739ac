// Middleware modules
pub mod admin;
pub mod credit_guard;
pub mod jwt_auth;

pub use admin::require_admin;
pub use credit_guard::{credit_guard_middleware, CreditGuard};
pub use jwt_auth::{jwt_auth_middleware, UserIdentity};

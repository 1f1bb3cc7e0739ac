// Service modules
pub mod admin_service;
pub mod ai_service;
pub mod analytics;
pub mod credit_service;
pub mod jwt_service;

pub use admin_service::AdminService;
pub use ai_service::AIService;
pub use credit_service::CreditService;
pub use jwt_service::JWTService;

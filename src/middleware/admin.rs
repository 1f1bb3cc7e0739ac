use crate::{
    error::{ApiError, Result},
    middleware::UserIdentity,
};
use axum::{extract::Request, middleware::Next, response::Response};

/// Reject non-admin callers. Must run after `jwt_auth_middleware`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response> {
    let identity = request
        .extensions()
        .get::<UserIdentity>()
        .ok_or_else(|| ApiError::Unauthorized("Missing user identity".to_string()))?;

    if !identity.is_admin {
        tracing::warn!("Admin route denied for user {}", identity.user_id);
        return Err(ApiError::Forbidden(
            "Administrator access required".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

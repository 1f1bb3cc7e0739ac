use crate::{
    app_state::AppState,
    error::{ApiError, Result},
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

/// Request extension storing verified user identity from JWT
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub is_admin: bool,
}

/// JWT authentication middleware
///
/// Extracts the Authorization header, validates the bearer token,
/// and stores the verified user identity in request extensions.
///
/// Returns 401 Unauthorized if the header is missing or token validation fails.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let headers = request.headers();

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    // Parse "Bearer <token>" format
    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::InvalidToken(
            "Invalid Authorization format, expected 'Bearer <token>'".to_string(),
        )
    })?;

    let claims = state.jwt_service.validate_token(token)?;

    let identity = UserIdentity {
        is_admin: state.jwt_service.is_admin(&claims),
        user_id: claims.sub,
    };

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Axum extractor for user identity
///
/// Only works on routes protected by jwt_auth_middleware.
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .cloned()
            .ok_or_else(|| {
                ApiError::Unauthorized(
                    "User identity not found - route must be protected by jwt_auth_middleware"
                        .to_string(),
                )
            })
    }
}

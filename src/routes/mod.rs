// Route modules
pub mod admin;
pub mod ai;
pub mod credits;
pub mod health;

use crate::{
    app_state::AppState,
    middleware::{credit_guard_middleware, jwt_auth_middleware, require_admin},
};
use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .nest("/api/v1", api_v1_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(TimeoutLayer::new(timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes(state: AppState) -> Router<AppState> {
    // Metered routes: authenticated, then charged per successful call
    let metered_routes = Router::new()
        .route("/ai/generate", post(ai::generate_text))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            credit_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    let user_routes = Router::new()
        .route("/credits", get(credits::get_credits))
        .route("/credits/transactions", get(credits::get_transactions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/credits/adjust", post(admin::adjust_credits))
        .route("/admin/credits/refund", post(admin::refund_credits))
        .route(
            "/admin/users/{user_id}/subscription",
            put(admin::update_subscription),
        )
        .route(
            "/admin/users/{user_id}/consistency",
            get(admin::check_consistency),
        )
        .route(
            "/admin/users/{user_id}/usage-pattern",
            get(admin::usage_pattern),
        )
        .route(
            "/admin/users/{user_id}/transactions",
            get(admin::user_transactions),
        )
        .route("/admin/stats", get(admin::system_stats))
        .route("/admin/alerts", get(admin::usage_alerts))
        .route("/admin/conversions", get(admin::conversion_report))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware));

    let public_routes = Router::new().route("/health", get(health::health));

    Router::new()
        .merge(metered_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .merge(public_routes)
}

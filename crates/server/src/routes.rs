//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers)
        .route("/v1/health", get(handlers::health_check))
        // Agent endpoints (authenticated by their signed bodies)
        .route("/v1/manifest.jsonl", get(handlers::get_manifest))
        .route("/v1/register", post(handlers::register))
        .route("/v1/submit", post(handlers::submit_results))
        .route("/v1/status", get(handlers::get_status))
        // Admin endpoints (require the admin secret)
        .route("/v1/admin/invites", post(handlers::create_invite_handler))
        .route("/v1/admin/locations", get(handlers::list_locations_handler))
        .route("/v1/admin/refresh", post(handlers::trigger_refresh));

    let mut router = Router::new().merge(api_routes);

    // The metrics endpoint is unauthenticated; restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

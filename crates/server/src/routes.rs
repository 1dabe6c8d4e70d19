//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Chunked uploads
        .route("/v1/uploads", post(handlers::init_upload))
        .route("/v1/uploads/{upload_id}", delete(handlers::abort_upload))
        .route(
            "/v1/uploads/{upload_id}/parts/{part_number}",
            put(handlers::upload_part),
        )
        .route(
            "/v1/uploads/{upload_id}/complete",
            post(handlers::complete_upload),
        )
        // Single-request uploads and deletes
        .route("/v1/files", post(handlers::upload_file))
        .route("/v1/files/{file_id}", delete(handlers::delete_file))
        .route("/v1/groups", post(handlers::create_group))
        .route("/v1/groups/{group_id}", delete(handlers::delete_group))
        // Links (redemption needs no credentials)
        .route("/v1/links", post(handlers::issue_link))
        .route("/v1/links/{token}", get(handlers::redeem_link))
        // Admin
        .route("/v1/admin/sweep", post(handlers::trigger_sweep));

    let mut router = Router::new().merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    // See crate::metrics module documentation for details.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

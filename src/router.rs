use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::healthcheck))
        // Fabric routes
        .route("/api/fabrics", post(handlers::fabrics::create_fabric))
        .route(
            "/api/fabrics/:name/settings",
            get(handlers::fabrics::get_fabric_settings).put(handlers::fabrics::update_fabric_settings),
        )
        .route(
            "/api/fabrics/:name/devices",
            post(handlers::fabrics::add_devices).delete(handlers::fabrics::delete_devices),
        )
        .route("/api/fabrics/:name/racks", post(handlers::fabrics::add_racks))
        .route("/api/fabrics/:name/validate", get(handlers::fabrics::validate_fabric))
        // Orchestration routes
        .route("/api/fabrics/:name/action-request", get(handlers::fabrics::get_action_request))
        .route("/api/fabrics/:name/configure", post(handlers::fabrics::configure_fabric))
        .route("/api/fabrics/:name/cleanup", post(handlers::fabrics::cleanup_fabric))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

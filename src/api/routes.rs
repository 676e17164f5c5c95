//! API route definitions
//!
//! Organizes endpoints for the collector:
//! - /api/v1/connect - session management (create, list, delete)
//! - /api/v1/connect/check - per-session endpoint health probe
//! - /api/v1/polling/start, /api/v1/polling/stop - polling lifecycle
//! - /api/:machineId/current - latest machine snapshot

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{handlers, ApiContext};

/// Create the application router.
pub fn create_app(context: ApiContext) -> Router {
    let v1 = Router::new()
        .route(
            "/connect",
            post(handlers::create_connection)
                .get(handlers::get_connections)
                .delete(handlers::delete_connection),
        )
        .route("/connect/check", post(handlers::check_connection))
        .route("/polling/start", get(handlers::start_polling))
        .route("/polling/stop", get(handlers::stop_polling));

    Router::new()
        .nest("/api/v1", v1)
        .route("/api/:machine_id/current", get(handlers::get_machine_current))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}

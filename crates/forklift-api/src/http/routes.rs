//! HTTP route definitions.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;

/// Create the router.
///
/// ```text
/// /queues/{queue}
///   POST /process     - Run one cycle, or drain with ?drain=true
///   POST /jobs        - Enqueue a job
///   GET  /stats       - Bucket sizes
///   POST /dead/retry  - Requeue dead letters
///
/// /health
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    let queue_routes = Router::new()
        .route("/{queue}/process", post(handlers::process_queue))
        .route("/{queue}/jobs", post(handlers::enqueue_job))
        .route("/{queue}/stats", get(handlers::queue_stats))
        .route("/{queue}/dead/retry", post(handlers::retry_dead))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
        .nest("/queues", queue_routes)
        .layer(TraceLayer::new_for_http())
}

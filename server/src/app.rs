use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the ingress router: `POST /jobs`, `GET /jobs/{job_id}`, `GET /health`.
/// Shared by the `mediaconvert-api` binary and by integration tests that want
/// to exercise it in-process (e.g. via `tower::ServiceExt::oneshot`) without
/// binding a real socket.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(handlers::create_job))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

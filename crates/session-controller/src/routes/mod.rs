//! HTTP routes for the Session Controller.
//!
//! Defines the Axum router and application state.

use crate::commands::SessionCommands;
use crate::handlers;
use crate::observability::{health_router, HealthState};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout. Host and resume wait for worker startup, so this must
/// stay above the configured startup timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub commands: SessionCommands,
}

/// Build the application routes.
///
/// - `/api/v1/sessions...` and `/api/v1/artifacts/purge` - command surface
/// - `/health`, `/ready` - probes
/// - `/metrics` - Prometheus scrape
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    prometheus: PrometheusHandle,
) -> Router {
    let api_routes = Router::new()
        .route(
            "/api/v1/sessions",
            post(handlers::host_session).get(handlers::list_sessions),
        )
        .route(
            "/api/v1/sessions/:token",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .route("/api/v1/sessions/:token/resume", post(handlers::resume_session))
        .route("/api/v1/sessions/:token/commands", post(handlers::send_command))
        .route("/api/v1/artifacts/purge", post(handlers::purge_artifacts))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(prometheus);

    // TimeoutLayer is innermost, TraceLayer sees the timed-out response.
    api_routes
        .merge(metrics_routes)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

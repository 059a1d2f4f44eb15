//! `GET /metrics` for Prometheus scraping.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Renders every `sc_*` metric in Prometheus text format. Labels are bounded
/// (transition, event, actor type); tokens and user ids never appear.
#[tracing::instrument(skip_all, name = "sc.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

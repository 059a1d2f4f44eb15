//! Metric definitions for the Session Controller.
//!
//! Prometheus naming: `sc_` prefix, `_total` suffix for counters, `_seconds`
//! suffix for duration histograms.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Session lifecycle transitions, used as the `transition` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Hosted,
    Resumed,
    Ended,
    Expired,
    Crashed,
    Failed,
}

impl SessionTransition {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionTransition::Hosted => "hosted",
            SessionTransition::Resumed => "resumed",
            SessionTransition::Ended => "ended",
            SessionTransition::Expired => "expired",
            SessionTransition::Crashed => "crashed",
            SessionTransition::Failed => "failed",
        }
    }
}

/// Channel-group lifecycle events, used as the `event` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    Provisioned,
    TornDown,
    Rollback,
    TeardownAborted,
}

impl GroupEvent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            GroupEvent::Provisioned => "provisioned",
            GroupEvent::TornDown => "torn_down",
            GroupEvent::Rollback => "rollback",
            GroupEvent::TeardownAborted => "teardown_aborted",
        }
    }
}

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Worker startup: embedded servers are ready in milliseconds, external
        // game servers can take several seconds to load their data file.
        .set_buckets_for_metric(
            Matcher::Prefix("sc_session_startup".to_string()),
            &[
                0.005, 0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 15.000,
            ],
        )
        .map_err(|e| format!("Failed to set session startup buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Sessions
// ============================================================================

/// Metric: `sc_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_sessions_active").set(count as f64);
}

/// Metric: `sc_session_transitions_total`
/// Labels: `transition`
pub fn record_session_transition(transition: SessionTransition) {
    counter!("sc_session_transitions_total", "transition" => transition.as_str()).increment(1);
}

/// Metric: `sc_session_startup_seconds`
pub fn record_session_startup(duration: Duration) {
    histogram!("sc_session_startup_seconds").record(duration.as_secs_f64());
}

/// Metric: `sc_artifacts_purged_total`
pub fn record_artifacts_purged(count: usize) {
    counter!("sc_artifacts_purged_total").increment(count as u64);
}

/// Metric: `sc_port_allocation_failures_total`
pub fn record_port_allocation_failure() {
    counter!("sc_port_allocation_failures_total").increment(1);
}

// ============================================================================
// Channel groups
// ============================================================================

/// Metric: `sc_channel_groups_active`
///
/// Each scope actor adjusts the gauge by its own delta, so the value is the
/// sum across guilds.
pub fn adjust_channel_groups_active(delta: f64) {
    gauge!("sc_channel_groups_active").increment(delta);
}

/// Metric: `sc_channel_group_events_total`
/// Labels: `event`
pub fn record_channel_group_event(event: GroupEvent) {
    counter!("sc_channel_group_events_total", "event" => event.as_str()).increment(1);
}

// ============================================================================
// Actors
// ============================================================================

/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

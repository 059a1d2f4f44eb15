//! Observability for the Session Controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Metric labels are bounded:
//! - `transition`: hosted, resumed, ended, expired, crashed, failed
//! - `event`: provisioned, torn_down, rollback, teardown_aborted
//! - `actor_type`: registry, scope
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_sessions_active` | Gauge | none | Running game sessions |
//! | `sc_session_transitions_total` | Counter | `transition` | Session lifecycle transitions |
//! | `sc_session_startup_seconds` | Histogram | none | Launch to ready latency |
//! | `sc_artifacts_purged_total` | Counter | none | Orphaned artifacts removed by purge |
//! | `sc_port_allocation_failures_total` | Counter | none | Port range exhaustion |
//! | `sc_channel_groups_active` | Gauge | none | Live channel groups across all guilds |
//! | `sc_channel_group_events_total` | Counter | `event` | Channel-group lifecycle events |
//! | `sc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor type |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;

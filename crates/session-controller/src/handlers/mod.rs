//! HTTP request handlers for the Session Controller.

pub mod metrics;
pub mod sessions;

pub use metrics::metrics_handler;
pub use sessions::{
    end_session, get_session, host_session, list_sessions, purge_artifacts, resume_session,
    send_command, ACTOR_HEADER,
};

//! Session Controller configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; malformed values are rejected rather than silently defaulted.

use common::UserId;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default host advertised to players in `host`/`resume` replies.
pub const DEFAULT_PUBLIC_HOST: &str = "127.0.0.1";

/// Default address workers bind their game port on.
pub const DEFAULT_WORKER_BIND_HOST: &str = "0.0.0.0";

/// Default HTTP bind address (command API, health, metrics).
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default artifact directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "./artifacts";

/// Default first port of the worker port range.
pub const DEFAULT_PORT_RANGE_START: u16 = 5000;

/// Default end of the worker port range (exclusive).
pub const DEFAULT_PORT_RANGE_END: u16 = 7000;

/// Default number of ports probed before giving up.
pub const DEFAULT_PORT_MAX_ATTEMPTS: u32 = 64;

/// Default number of launch attempts when the port is taken at bind time.
pub const DEFAULT_LAUNCH_MAX_ATTEMPTS: u32 = 5;

/// Default worker startup timeout in seconds.
pub const DEFAULT_STARTUP_TIMEOUT_SECONDS: u64 = 15;

/// Default number of token generation attempts.
pub const DEFAULT_TOKEN_MAX_ATTEMPTS: u32 = 1000;

/// Default maximum session age in seconds (eight hours).
pub const DEFAULT_SESSION_MAX_AGE_SECONDS: u64 = 8 * 60 * 60;

/// Default interval between expiry sweeps in seconds.
pub const DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default grace period before an empty channel group is destroyed.
pub const DEFAULT_GROUP_TEARDOWN_GRACE_SECONDS: u64 = 0;

/// Session Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host advertised to players (default: "127.0.0.1").
    pub public_host: String,

    /// Address workers bind on (default: "0.0.0.0").
    pub worker_bind_host: String,

    /// HTTP server bind address (default: "0.0.0.0:8090").
    pub http_bind_address: String,

    /// Directory holding `<TOKEN>.data` / `<TOKEN>.save` artifacts.
    pub artifact_dir: PathBuf,

    /// First port of the worker range (inclusive).
    pub port_range_start: u16,

    /// End of the worker range (exclusive).
    pub port_range_end: u16,

    /// Ports probed per allocation before `NoPortAvailable`.
    pub port_max_attempts: u32,

    /// Launch attempts when the allocated port is taken at bind time.
    pub launch_max_attempts: u32,

    /// Worker startup deadline in seconds.
    pub startup_timeout_seconds: u64,

    /// Token generation attempts before `DuplicateToken`.
    pub token_max_attempts: u32,

    /// Sessions older than this are stopped (0 disables expiry).
    pub session_max_age_seconds: u64,

    /// Interval between expiry sweeps.
    pub session_sweep_interval_seconds: u64,

    /// External game server binary. `None` selects the embedded server.
    pub worker_command: Option<String>,

    /// Extra arguments passed to the external game server.
    pub worker_args: Vec<String>,

    /// Grace period before an empty channel group is destroyed (0 = immediate).
    pub group_teardown_grace_seconds: u64,

    /// Users allowed to end sessions and purge artifacts. Empty allows everyone.
    pub operator_ids: Vec<UserId>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let string_or = |key: &str, default: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port_range_start = parse_or(vars, "SC_PORT_RANGE_START", DEFAULT_PORT_RANGE_START)?;
        let port_range_end = parse_or(vars, "SC_PORT_RANGE_END", DEFAULT_PORT_RANGE_END)?;
        if port_range_start >= port_range_end {
            return Err(ConfigError::InvalidValue(format!(
                "SC_PORT_RANGE_START ({port_range_start}) must be below SC_PORT_RANGE_END ({port_range_end})"
            )));
        }

        let port_max_attempts = positive(
            "SC_PORT_MAX_ATTEMPTS",
            parse_or(vars, "SC_PORT_MAX_ATTEMPTS", DEFAULT_PORT_MAX_ATTEMPTS)?,
        )?;
        let launch_max_attempts = positive(
            "SC_LAUNCH_MAX_ATTEMPTS",
            parse_or(vars, "SC_LAUNCH_MAX_ATTEMPTS", DEFAULT_LAUNCH_MAX_ATTEMPTS)?,
        )?;
        let token_max_attempts = positive(
            "SC_TOKEN_MAX_ATTEMPTS",
            parse_or(vars, "SC_TOKEN_MAX_ATTEMPTS", DEFAULT_TOKEN_MAX_ATTEMPTS)?,
        )?;
        let startup_timeout_seconds = positive(
            "SC_STARTUP_TIMEOUT_SECONDS",
            parse_or(
                vars,
                "SC_STARTUP_TIMEOUT_SECONDS",
                DEFAULT_STARTUP_TIMEOUT_SECONDS,
            )?,
        )?;
        let session_sweep_interval_seconds = positive(
            "SC_SESSION_SWEEP_INTERVAL_SECONDS",
            parse_or(
                vars,
                "SC_SESSION_SWEEP_INTERVAL_SECONDS",
                DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS,
            )?,
        )?;

        let session_max_age_seconds = parse_or(
            vars,
            "SC_SESSION_MAX_AGE_SECONDS",
            DEFAULT_SESSION_MAX_AGE_SECONDS,
        )?;
        let group_teardown_grace_seconds = parse_or(
            vars,
            "SC_GROUP_TEARDOWN_GRACE_SECONDS",
            DEFAULT_GROUP_TEARDOWN_GRACE_SECONDS,
        )?;

        let worker_command = vars
            .get("SC_WORKER_COMMAND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let worker_args = vars
            .get("SC_WORKER_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let operator_ids = match vars.get("SC_OPERATOR_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<UserId>()
                        .map_err(|e| ConfigError::InvalidValue(format!("SC_OPERATOR_IDS: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            public_host: string_or("SC_PUBLIC_HOST", DEFAULT_PUBLIC_HOST),
            worker_bind_host: string_or("SC_WORKER_BIND_HOST", DEFAULT_WORKER_BIND_HOST),
            http_bind_address: string_or("SC_HTTP_BIND_ADDRESS", DEFAULT_HTTP_BIND_ADDRESS),
            artifact_dir: PathBuf::from(string_or("SC_ARTIFACT_DIR", DEFAULT_ARTIFACT_DIR)),
            port_range_start,
            port_range_end,
            port_max_attempts,
            launch_max_attempts,
            startup_timeout_seconds,
            token_max_attempts,
            session_max_age_seconds,
            session_sweep_interval_seconds,
            worker_command,
            worker_args,
            group_teardown_grace_seconds,
            operator_ids,
        })
    }

    /// Worker startup deadline.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Maximum session age, or `None` when expiry is disabled.
    #[must_use]
    pub fn session_max_age(&self) -> Option<Duration> {
        (self.session_max_age_seconds > 0).then(|| Duration::from_secs(self.session_max_age_seconds))
    }

    /// Interval between expiry sweeps.
    #[must_use]
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_seconds)
    }

    /// Grace period before empty channel groups are destroyed.
    #[must_use]
    pub fn group_teardown_grace(&self) -> Duration {
        Duration::from_secs(self.group_teardown_grace_seconds)
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn positive<T: PartialOrd + Default + std::fmt::Display>(
    key: &str,
    value: T,
) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(format!("{key} must be positive, got {value}")))
    }
}

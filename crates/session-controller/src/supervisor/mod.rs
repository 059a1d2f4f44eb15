//! Worker supervision.
//!
//! A worker is the game server for one session: an external subprocess
//! ([`subprocess`]) or a server inside this process ([`embedded`]). The
//! [`ProcessSupervisor`] owns port allocation for workers, retries launches
//! whose port was taken between probe and bind, and bounds how long a worker
//! may take to start accepting connections.

pub mod embedded;
pub mod subprocess;

pub use embedded::EmbeddedLauncher;
pub use subprocess::SubprocessLauncher;

use crate::allocation::{PortAllocator, PortLease, Token};
use crate::artifacts::WorkerArtifacts;
use crate::errors::ScError;
use crate::observability::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Behavioral parameters passed to the game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerParams {
    /// Checkpoints between save writes.
    pub checkpoint_interval: u32,
    /// Points spent per hint.
    pub hint_cost: u32,
    /// Whether players may use cheat commands.
    pub allow_cheats: bool,
}

impl Default for WorkerParams {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1,
            hint_cost: 50,
            allow_cheats: false,
        }
    }
}

/// Everything a launcher needs to start one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub token: Token,
    pub bind_host: IpAddr,
    pub port: u16,
    pub artifacts: WorkerArtifacts,
    pub params: WorkerParams,
}

/// Starts workers of one kind.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Spawn a worker. Returns once the worker exists, not once it is ready.
    ///
    /// A launcher that binds the port itself returns `ScError::PortInUse` when
    /// the bind fails; the supervisor retries on a fresh port.
    async fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn Worker>, ScError>;
}

/// A launched worker.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Resolves once the worker accepts connections. Fails with
    /// `ScError::WorkerExited` if it died first. Never times out on its own.
    async fn ready(&self) -> Result<(), ScError>;

    /// Deliver an operator message (one console line).
    async fn send(&self, message: &str) -> Result<(), ScError>;

    /// Terminate the worker and wait for it to go away. Idempotent.
    async fn stop(&self);

    fn is_alive(&self) -> bool;
}

/// Launches workers for the session registry.
pub struct ProcessSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    ports: PortAllocator,
    startup_timeout: Duration,
    launch_max_attempts: u32,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        ports: PortAllocator,
        startup_timeout: Duration,
        launch_max_attempts: u32,
    ) -> Self {
        Self {
            launcher,
            ports,
            startup_timeout,
            launch_max_attempts: launch_max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Start a worker for `token` and wait until it is ready.
    ///
    /// `cancel` is the teardown signal for this token: if it fires first the
    /// half-started worker is stopped and the call fails with
    /// `ScError::ConcurrentTeardownConflict`.
    ///
    /// # Errors
    ///
    /// - `NoPortAvailable` if no port could be leased, or every attempt hit a
    ///   port taken at bind time
    /// - `StartupTimeout` if the worker was not ready within the deadline
    /// - `WorkerExited` if the worker died during startup
    /// - `ConcurrentTeardownConflict` on cancellation
    #[instrument(skip_all, name = "sc.supervisor.start", fields(token = %token))]
    pub async fn start(
        &self,
        token: &Token,
        artifacts: WorkerArtifacts,
        params: WorkerParams,
        cancel: &CancellationToken,
    ) -> Result<WorkerHandle, ScError> {
        let started = Instant::now();

        for attempt in 1..=self.launch_max_attempts {
            if cancel.is_cancelled() {
                return Err(ScError::ConcurrentTeardownConflict(token.to_string()));
            }

            let lease = self.ports.allocate().await?;
            let spec = WorkerSpec {
                token: token.clone(),
                bind_host: self.ports.bind_host(),
                port: lease.port(),
                artifacts: artifacts.clone(),
                params,
            };

            let worker = match self.launcher.launch(&spec).await {
                Ok(worker) => worker,
                Err(ScError::PortInUse(port)) => {
                    warn!(target: "sc.supervisor", token = %token, port, attempt, "Port taken at bind, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = tokio::select! {
                () = cancel.cancelled() => Err(ScError::ConcurrentTeardownConflict(token.to_string())),
                ready = tokio::time::timeout(self.startup_timeout, worker.ready()) => match ready {
                    Ok(result) => result,
                    Err(_) => Err(ScError::StartupTimeout),
                },
            };

            match outcome {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    metrics::record_session_startup(elapsed);
                    info!(
                        target: "sc.supervisor",
                        token = %token,
                        port = spec.port,
                        startup_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Worker ready"
                    );
                    return Ok(WorkerHandle::new(token.clone(), worker, lease));
                }
                Err(ScError::PortInUse(port)) => {
                    worker.stop().await;
                    warn!(target: "sc.supervisor", token = %token, port, attempt, "Worker lost its port, retrying");
                }
                Err(e) => {
                    worker.stop().await;
                    warn!(target: "sc.supervisor", token = %token, error = %e, "Worker failed to start");
                    return Err(e);
                }
            }
        }

        Err(ScError::NoPortAvailable)
    }
}

/// A running worker plus the port lease it holds.
///
/// The lease is released only after the worker has been stopped.
pub struct WorkerHandle {
    token: Token,
    port: u16,
    worker: Box<dyn Worker>,
    lease: Mutex<Option<PortLease>>,
    stopped: AtomicBool,
}

impl WorkerHandle {
    fn new(token: Token, worker: Box<dyn Worker>, lease: PortLease) -> Self {
        Self {
            token,
            port: lease.port(),
            worker,
            lease: Mutex::new(Some(lease)),
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Whether the worker is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.worker.is_alive()
    }

    /// Deliver an operator message.
    ///
    /// # Errors
    ///
    /// `ScError::HandleClosed` if the worker has exited or was stopped.
    pub async fn send(&self, message: &str) -> Result<(), ScError> {
        if !self.is_alive() {
            return Err(ScError::HandleClosed(self.token.to_string()));
        }
        self.worker.send(message).await
    }

    /// Stop the worker and release its port. A second call is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.worker.stop().await;
        drop(
            self.lease
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        debug!(target: "sc.supervisor", token = %self.token, port = self.port, "Worker stopped");
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("token", &self.token)
            .field("port", &self.port)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

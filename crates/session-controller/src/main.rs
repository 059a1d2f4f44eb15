//! Session Controller
//!
//! Hosts game sessions on leased ports and exposes the session command
//! surface over HTTP.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the artifact store
//! 4. Build the worker supervisor (subprocess when `SC_WORKER_COMMAND` is
//!    set, embedded server otherwise)
//! 5. Spawn the session registry actor
//! 6. Serve the HTTP API, probes and `/metrics`
//! 7. Wait for shutdown signal, then stop every worker

#![warn(clippy::pedantic)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use session_controller::actors::{ActorMetrics, RegistryConfig, SessionRegistryHandle};
use session_controller::allocation::{PortAllocator, PortRange};
use session_controller::artifacts::{ArtifactStore, FsArtifactStore};
use session_controller::commands::{OperatorPolicy, SessionCommands};
use session_controller::config::Config;
use session_controller::observability::{init_metrics_recorder, HealthState};
use session_controller::routes::{self, AppState};
use session_controller::supervisor::{
    EmbeddedLauncher, ProcessSupervisor, SubprocessLauncher, WorkerLauncher,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for the registry to stop its workers.
const REGISTRY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(45);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        public_host = %config.public_host,
        http_bind_address = %config.http_bind_address,
        artifact_dir = %config.artifact_dir.display(),
        port_range_start = config.port_range_start,
        port_range_end = config.port_range_end,
        worker_command = ?config.worker_command,
        session_max_age_seconds = config.session_max_age_seconds,
        operators = config.operator_ids.len(),
        "Configuration loaded successfully"
    );

    // Must happen before any metric is recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let store: Arc<dyn ArtifactStore> = Arc::new(
        FsArtifactStore::open(config.artifact_dir.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to open artifact store");
                e
            })?,
    );

    let launcher: Arc<dyn WorkerLauncher> = match &config.worker_command {
        Some(command) => {
            info!(command = %command, "Using subprocess workers");
            Arc::new(SubprocessLauncher::new(command.clone(), config.worker_args.clone()))
        }
        None => {
            info!("Using embedded workers");
            Arc::new(EmbeddedLauncher::new())
        }
    };

    let bind_host: IpAddr = config.worker_bind_host.parse().map_err(|e| {
        error!(error = %e, host = %config.worker_bind_host, "Invalid worker bind host");
        format!("Invalid worker bind host: {e}")
    })?;
    let ports = PortAllocator::new(
        PortRange::new(config.port_range_start, config.port_range_end)?,
        bind_host,
        config.port_max_attempts,
    );
    let supervisor = Arc::new(ProcessSupervisor::new(
        launcher,
        ports,
        config.startup_timeout(),
        config.launch_max_attempts,
    ));

    let actor_metrics = ActorMetrics::new();
    let (registry, registry_task) = SessionRegistryHandle::spawn(
        RegistryConfig::from_config(&config),
        store,
        supervisor,
        Arc::clone(&actor_metrics),
    );
    info!("Session registry started");

    let commands = SessionCommands::new(
        registry.clone(),
        Arc::new(OperatorPolicy::new(config.operator_ids.iter().copied())),
    );
    let state = Arc::new(AppState { commands });
    let app = routes::build_routes(state, Arc::clone(&health_state), prometheus_handle);

    let http_addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %http_addr, "Failed to bind HTTP server");
            format!("Failed to bind HTTP server to {http_addr}: {e}")
        })?;

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        info!(addr = %http_addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Session Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop routing new sessions here first
    health_state.set_not_ready();

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Session registry shutdown error");
    }
    match tokio::time::timeout(REGISTRY_SHUTDOWN_TIMEOUT, registry_task).await {
        Ok(Ok(())) => info!("Session registry stopped"),
        Ok(Err(e)) => warn!(error = %e, "Session registry task failed"),
        Err(_) => warn!("Session registry shutdown timed out"),
    }

    shutdown_token.cancel();
    if let Err(e) = server_task.await {
        warn!(error = %e, "HTTP server task failed");
    }

    info!(
        messages_processed = actor_metrics.messages_processed(),
        "Session Controller shutdown complete"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

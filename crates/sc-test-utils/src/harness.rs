//! Wired-up controllers for integration tests.
//!
//! - [`TestSessions`] - session registry over a [`MockLauncher`] and an
//!   in-memory artifact store, plus the HTTP router on top of it
//! - [`TestChannels`] - voice-state reactor over a [`MockPlatform`]

use crate::fixtures::GUILD;
use crate::mock_launcher::MockLauncher;
use crate::mock_platform::MockPlatform;
use axum::Router;
use common::{GuildId, UserId};
use metrics_exporter_prometheus::PrometheusBuilder;
use session_controller::actors::{
    ActorMetrics, RegistryConfig, SessionRegistryHandle, VoiceStateReactor,
};
use session_controller::allocation::{PortAllocator, PortRange};
use session_controller::artifacts::{ArtifactStore, InMemoryArtifactStore};
use session_controller::channels::{
    ChannelGroupProvisioner, GroupSummary, InMemoryNumberLedger, NumberLedger, RoomSystem,
};
use session_controller::commands::{OperatorPolicy, SessionCommands};
use session_controller::observability::HealthState;
use session_controller::presence::{PresenceOutcome, VoiceStateUpdate};
use session_controller::routes::{self, AppState};
use session_controller::supervisor::ProcessSupervisor;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Host advertised by test registries.
pub const TEST_PUBLIC_HOST: &str = "games.test";

/// Width of the port range each harness gets.
pub const TEST_PORT_SPAN: u16 = 40;

/// Builder for [`TestSessions`].
pub struct TestSessionsBuilder {
    launcher: MockLauncher,
    store: Arc<dyn ArtifactStore>,
    port_start: u16,
    port_span: u16,
    startup_timeout: Duration,
    session_max_age: Option<Duration>,
    sweep_interval: Duration,
    operators: Vec<UserId>,
}

impl TestSessionsBuilder {
    pub fn ports(mut self, start: u16, span: u16) -> Self {
        self.port_start = start;
        self.port_span = span;
        self
    }

    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn session_max_age(mut self, max_age: Duration, sweep_interval: Duration) -> Self {
        self.session_max_age = Some(max_age);
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn operators(mut self, operators: impl IntoIterator<Item = UserId>) -> Self {
        self.operators = operators.into_iter().collect();
        self
    }

    pub fn spawn(self) -> Result<TestSessions, anyhow::Error> {
        let range = PortRange::new(self.port_start, self.port_start + self.port_span)
            .map_err(|e| anyhow::anyhow!("Invalid test port range: {}", e))?;
        let ports = PortAllocator::new(
            range,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            u32::from(self.port_span) * 2,
        );
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(self.launcher.clone()),
            ports.clone(),
            self.startup_timeout,
            3,
        ));
        let config = RegistryConfig {
            public_host: TEST_PUBLIC_HOST.to_string(),
            token_max_attempts: 1_000,
            session_max_age: self.session_max_age,
            sweep_interval: self.sweep_interval,
        };
        let metrics = ActorMetrics::new();
        let (registry, task) = SessionRegistryHandle::spawn(
            config,
            Arc::clone(&self.store),
            supervisor,
            Arc::clone(&metrics),
        );
        let commands = SessionCommands::new(
            registry.clone(),
            Arc::new(OperatorPolicy::new(self.operators)),
        );

        Ok(TestSessions {
            launcher: self.launcher,
            store: self.store,
            ports,
            registry,
            commands,
            metrics,
            task: Some(task),
        })
    }
}

/// A running session registry with mock workers.
pub struct TestSessions {
    launcher: MockLauncher,
    store: Arc<dyn ArtifactStore>,
    ports: PortAllocator,
    registry: SessionRegistryHandle,
    commands: SessionCommands,
    metrics: Arc<ActorMetrics>,
    task: Option<JoinHandle<()>>,
}

impl TestSessions {
    /// Defaults: in-memory store, 5s startup timeout, no expiry, no operators.
    pub fn builder(launcher: MockLauncher, port_start: u16) -> TestSessionsBuilder {
        TestSessionsBuilder {
            launcher,
            store: Arc::new(InMemoryArtifactStore::new()),
            port_start,
            port_span: TEST_PORT_SPAN,
            startup_timeout: Duration::from_secs(5),
            session_max_age: None,
            sweep_interval: Duration::from_secs(60),
            operators: Vec::new(),
        }
    }

    pub fn spawn(launcher: MockLauncher, port_start: u16) -> Result<Self, anyhow::Error> {
        Self::builder(launcher, port_start).spawn()
    }

    pub fn launcher(&self) -> &MockLauncher {
        &self.launcher
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// The allocator the supervisor leases from.
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn registry(&self) -> &SessionRegistryHandle {
        &self.registry
    }

    pub fn commands(&self) -> &SessionCommands {
        &self.commands
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// HTTP router over this registry. Readiness is already set.
    pub fn router(&self) -> Router {
        let health = Arc::new(HealthState::new());
        health.set_ready();
        let prometheus = PrometheusBuilder::new().build_recorder().handle();
        routes::build_routes(
            Arc::new(AppState {
                commands: self.commands.clone(),
            }),
            health,
            prometheus,
        )
    }

    /// Shut the registry down and wait for its task.
    pub async fn shutdown(mut self) -> Result<(), anyhow::Error> {
        self.registry
            .shutdown()
            .await
            .map_err(|e| anyhow::anyhow!("Registry shutdown failed: {}", e))?;
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for TestSessions {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.registry.cancel();
            task.abort();
        }
    }
}

/// A voice-state reactor over a mock platform.
pub struct TestChannels {
    platform: MockPlatform,
    ledger: Arc<InMemoryNumberLedger>,
    reactor: VoiceStateReactor,
    metrics: Arc<ActorMetrics>,
}

impl TestChannels {
    pub fn new(grace: Duration) -> Self {
        Self::with_platform(MockPlatform::new(), grace)
    }

    pub fn with_platform(platform: MockPlatform, grace: Duration) -> Self {
        let provisioner = Arc::new(ChannelGroupProvisioner::new(
            Arc::new(platform.clone()),
            Arc::new(platform.clone()),
        ));
        let ledger = Arc::new(InMemoryNumberLedger::new());
        let metrics = ActorMetrics::new();
        let reactor = VoiceStateReactor::new(
            provisioner,
            Arc::clone(&ledger) as Arc<dyn NumberLedger>,
            grace,
            Arc::clone(&metrics),
        );
        Self {
            platform,
            ledger,
            reactor,
            metrics,
        }
    }

    pub fn platform(&self) -> &MockPlatform {
        &self.platform
    }

    pub fn ledger(&self) -> &Arc<InMemoryNumberLedger> {
        &self.ledger
    }

    pub fn reactor(&self) -> &VoiceStateReactor {
        &self.reactor
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Register `system` in [`GUILD`].
    ///
    /// # Panics
    ///
    /// If registration fails.
    pub async fn register(&self, system: RoomSystem) {
        self.reactor
            .register_room_system(GUILD, system)
            .await
            .expect("register room system");
    }

    /// Apply an update and return its outcomes.
    ///
    /// # Panics
    ///
    /// If the reactor returns an error.
    pub async fn apply(&self, update: VoiceStateUpdate) -> Vec<PresenceOutcome> {
        self.reactor
            .apply_update(update)
            .await
            .expect("apply voice state update")
    }

    /// Live groups of `guild`.
    ///
    /// # Panics
    ///
    /// If the reactor returns an error.
    pub async fn groups(&self, guild: GuildId) -> Vec<GroupSummary> {
        self.reactor.groups(guild).await.expect("list groups")
    }
}

//! `SessionRegistry` - the authoritative map from token to live session.
//!
//! A single actor owns every session entry, so token reservation, the
//! at-most-one-session-per-token rule and every state transition are
//! serialized through one mailbox. Slow work (saving the uploaded artifact,
//! starting the worker) runs in a spawned launch task that reports back
//! through an internal channel; the entry sits in `provisioning` until then.
//!
//! ```text
//! absent ──host/resume──▶ provisioning ──ready──▶ running ──end/expire──▶ absent
//!                              │                     │
//!                              └──failure/end──▶ absent   └──found dead──▶ crashed ──▶ absent
//! ```
//!
//! # Teardown during launch
//!
//! `end` on a provisioning entry cancels the launch and parks the caller.
//! When the launch task reports back, whatever it produced is stopped, the
//! artifacts are deleted, the parked callers get `Ok` and the original
//! host/resume caller gets `ConcurrentTeardownConflict`.

use super::messages::{RegistryMessage, SessionEndpoint, SessionInfo, SessionState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::allocation::{IdentifierAllocator, Token};
use crate::artifacts::ArtifactStore;
use crate::artifacts::ArtifactKind;
use crate::config::Config;
use crate::errors::ScError;
use crate::observability::metrics::{self as prom, SessionTransition};
use crate::supervisor::{ProcessSupervisor, WorkerHandle, WorkerParams};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for in-flight launches to report back.
const LAUNCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host returned to players in every endpoint.
    pub public_host: String,
    pub token_max_attempts: u32,
    /// `None` disables expiry.
    pub session_max_age: Option<Duration>,
    pub sweep_interval: Duration,
}

impl RegistryConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            public_host: config.public_host.clone(),
            token_max_attempts: config.token_max_attempts,
            session_max_age: config.session_max_age(),
            sweep_interval: config.session_sweep_interval(),
        }
    }
}

/// Handle to the `SessionRegistry` actor.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryHandle {
    /// Spawn the registry actor.
    #[must_use]
    pub fn spawn(
        config: RegistryConfig,
        store: Arc<dyn ArtifactStore>,
        supervisor: Arc<ProcessSupervisor>,
        metrics: Arc<ActorMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistry::new(
            config,
            receiver,
            cancel_token.clone(),
            store,
            supervisor,
            metrics,
        );
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task,
        )
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ScError>>) -> RegistryMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Host a new session for `data`. Resolves once the worker is ready.
    ///
    /// # Errors
    ///
    /// `DuplicateToken`, `NoPortAvailable`, `StartupTimeout`, `WorkerExited`,
    /// `Storage`, `ShuttingDown`, or `ConcurrentTeardownConflict` if the session
    /// was ended while starting.
    pub async fn host(&self, data: Bytes, params: WorkerParams) -> Result<SessionEndpoint, ScError> {
        self.request(|respond_to| RegistryMessage::Host {
            data,
            params,
            respond_to,
        })
        .await
    }

    /// Restart a stored game under its existing token.
    ///
    /// # Errors
    ///
    /// `SessionAlreadyRunning` if the token is live, `ArtifactNotFound` if no
    /// data artifact is stored, plus the launch errors of [`host`](Self::host).
    pub async fn resume(&self, token: Token, params: WorkerParams) -> Result<SessionEndpoint, ScError> {
        self.request(|respond_to| RegistryMessage::Resume {
            token,
            params,
            respond_to,
        })
        .await
    }

    /// Forward an operator message to the session's worker.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `SessionNotRunning` while provisioning, or
    /// `HandleClosed` if the worker has died.
    pub async fn send(&self, token: Token, message: String) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::Send {
            token,
            message,
            respond_to,
        })
        .await
    }

    /// Stop the session and delete its artifacts.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the token has no live session.
    pub async fn end(&self, token: Token) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::End { token, respond_to })
            .await
    }

    /// Delete artifacts of every token without a live session. Returns the
    /// number of tokens purged.
    ///
    /// # Errors
    ///
    /// `Storage` if the artifact namespace cannot be listed.
    pub async fn purge(&self) -> Result<usize, ScError> {
        self.request(|respond_to| RegistryMessage::Purge { respond_to })
            .await
    }

    /// # Errors
    ///
    /// `SessionNotFound` if the token has no session.
    pub async fn get(&self, token: Token) -> Result<SessionInfo, ScError> {
        self.request(|respond_to| RegistryMessage::Get { token, respond_to })
            .await
    }

    /// # Errors
    ///
    /// Only channel failures.
    pub async fn list(&self) -> Result<Vec<SessionInfo>, ScError> {
        self.request(|respond_to| RegistryMessage::List { respond_to })
            .await
    }

    /// Stop every worker, fail in-flight launches and exit. Artifacts are kept.
    ///
    /// # Errors
    ///
    /// Only channel failures.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the actor (runs the same cleanup as [`shutdown`](Self::shutdown)).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchOrigin {
    Host,
    Resume,
}

/// A host/resume in flight.
struct PendingLaunch {
    generation: u64,
    origin: LaunchOrigin,
    params: WorkerParams,
    created_at: DateTime<Utc>,
    /// Cancels the launch task's worker start.
    cancel: CancellationToken,
    respond_to: oneshot::Sender<Result<SessionEndpoint, ScError>>,
    /// `end` callers waiting for the launch to unwind.
    end_waiters: Vec<oneshot::Sender<Result<(), ScError>>>,
}

struct RunningSession {
    handle: WorkerHandle,
    params: WorkerParams,
    created_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    /// Monotonic start time for expiry.
    started: Instant,
}

enum Entry {
    Provisioning(PendingLaunch),
    Running(RunningSession),
}

/// Report from a launch task.
struct LaunchOutcome {
    token: Token,
    generation: u64,
    result: Result<WorkerHandle, ScError>,
}

pub struct SessionRegistry {
    registry_id: Uuid,
    config: RegistryConfig,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn ArtifactStore>,
    supervisor: Arc<ProcessSupervisor>,
    tokens: IdentifierAllocator,
    entries: HashMap<Token, Entry>,
    outcomes_tx: mpsc::Sender<LaunchOutcome>,
    outcomes_rx: mpsc::Receiver<LaunchOutcome>,
    next_generation: u64,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionRegistry {
    fn new(
        config: RegistryConfig,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        store: Arc<dyn ArtifactStore>,
        supervisor: Arc<ProcessSupervisor>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let registry_id = Uuid::new_v4();
        let (outcomes_tx, outcomes_rx) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        Self {
            registry_id,
            tokens: IdentifierAllocator::new(config.token_max_attempts),
            config,
            receiver,
            cancel_token,
            store,
            supervisor,
            entries: HashMap::new(),
            outcomes_tx,
            outcomes_rx,
            next_generation: 0,
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, registry_id.to_string()),
        }
    }

    #[instrument(skip_all, name = "sc.actor.registry", fields(registry_id = %self.registry_id))]
    async fn run(mut self) {
        info!(target: "sc.actor.registry", registry_id = %self.registry_id, "SessionRegistry started");

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let expiry_enabled = self.config.session_max_age.is_some();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "sc.actor.registry", registry_id = %self.registry_id, "SessionRegistry received cancellation signal");
                    self.graceful_shutdown().await;
                    break;
                }

                Some(outcome) = self.outcomes_rx.recv() => {
                    self.on_launch_outcome(outcome).await;
                }

                _ = sweep.tick(), if expiry_enabled => {
                    self.expire_sessions().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(RegistryMessage::Shutdown { respond_to }) => {
                            self.graceful_shutdown().await;
                            let _ = respond_to.send(Ok(()));
                            break;
                        }
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(target: "sc.actor.registry", registry_id = %self.registry_id, "SessionRegistry channel closed, exiting");
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.registry",
            registry_id = %self.registry_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistry stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Host {
                data,
                params,
                respond_to,
            } => self.host(data, params, respond_to).await,

            RegistryMessage::Resume {
                token,
                params,
                respond_to,
            } => self.resume(token, params, respond_to).await,

            RegistryMessage::Send {
                token,
                message,
                respond_to,
            } => {
                let result = self.send(&token, &message).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::End { token, respond_to } => self.end(token, respond_to).await,

            RegistryMessage::Purge { respond_to } => {
                let result = self.purge().await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Get { token, respond_to } => {
                let result = self.get(&token).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::List { respond_to } => {
                let sessions = self.list().await;
                let _ = respond_to.send(Ok(sessions));
            }

            RegistryMessage::Shutdown { respond_to } => {
                // Handled in the run loop.
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    async fn host(
        &mut self,
        data: Bytes,
        params: WorkerParams,
        respond_to: oneshot::Sender<Result<SessionEndpoint, ScError>>,
    ) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(ScError::ShuttingDown));
            return;
        }
        if data.is_empty() {
            let _ = respond_to.send(Err(ScError::InvalidRequest("game data is empty".to_string())));
            return;
        }

        // A fresh token must not collide with a live session or with stored
        // artifacts of a resumable game.
        let stored = match self.store.tokens().await {
            Ok(stored) => stored,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };
        let token = match self
            .tokens
            .generate_free_token(|t| !self.entries.contains_key(t) && !stored.contains(t))
        {
            Ok(token) => token,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        debug!(target: "sc.actor.registry", token = %token, size = data.len(), "Hosting session");
        self.begin_launch(token, LaunchOrigin::Host, Some(data), params, respond_to);
    }

    async fn resume(
        &mut self,
        token: Token,
        params: WorkerParams,
        respond_to: oneshot::Sender<Result<SessionEndpoint, ScError>>,
    ) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(ScError::ShuttingDown));
            return;
        }

        let live = match self.entries.get(&token) {
            Some(Entry::Running(running)) => Some(running.handle.is_alive()),
            Some(Entry::Provisioning(_)) => Some(true),
            None => None,
        };
        match live {
            Some(true) => {
                let _ = respond_to.send(Err(ScError::SessionAlreadyRunning(token.to_string())));
                return;
            }
            Some(false) => self.mark_crashed(&token).await,
            None => {}
        }

        match self.store.exists(&token, ArtifactKind::Data).await {
            Ok(true) => {}
            Ok(false) => {
                let _ = respond_to.send(Err(ScError::ArtifactNotFound(token.to_string())));
                return;
            }
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        }

        debug!(target: "sc.actor.registry", token = %token, "Resuming session");
        self.begin_launch(token, LaunchOrigin::Resume, None, params, respond_to);
    }

    /// Reserve `token` and start the launch task.
    fn begin_launch(
        &mut self,
        token: Token,
        origin: LaunchOrigin,
        data: Option<Bytes>,
        params: WorkerParams,
        respond_to: oneshot::Sender<Result<SessionEndpoint, ScError>>,
    ) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = self.cancel_token.child_token();

        self.entries.insert(
            token.clone(),
            Entry::Provisioning(PendingLaunch {
                generation,
                origin,
                params,
                created_at: Utc::now(),
                cancel: cancel.clone(),
                respond_to,
                end_waiters: Vec::new(),
            }),
        );

        let store = Arc::clone(&self.store);
        let supervisor = Arc::clone(&self.supervisor);
        let outcomes = self.outcomes_tx.clone();

        tokio::spawn(async move {
            let result = async {
                if let Some(data) = data {
                    store.save(&token, ArtifactKind::Data, data).await?;
                }
                let artifacts = store.worker_artifacts(&token).await?;
                supervisor.start(&token, artifacts, params, &cancel).await
            }
            .await;

            let outcome = LaunchOutcome {
                token,
                generation,
                result,
            };
            if let Err(mpsc::error::SendError(orphan)) = outcomes.send(outcome).await {
                // Registry is gone; do not leave the worker running.
                if let Ok(handle) = orphan.result {
                    handle.stop().await;
                }
            }
        });
    }

    async fn on_launch_outcome(&mut self, outcome: LaunchOutcome) {
        let LaunchOutcome {
            token,
            generation,
            result,
        } = outcome;

        let current = matches!(
            self.entries.get(&token),
            Some(Entry::Provisioning(pending)) if pending.generation == generation
        );
        let pending = match self.entries.remove(&token) {
            Some(Entry::Provisioning(pending)) if current => pending,
            other => {
                if let Some(entry) = other {
                    self.entries.insert(token.clone(), entry);
                }
                warn!(target: "sc.actor.registry", token = %token, generation, "Stale launch outcome");
                if let Ok(handle) = result {
                    handle.stop().await;
                }
                return;
            }
        };

        if pending.cancel.is_cancelled() {
            self.unwind_cancelled_launch(&token, pending, result).await;
            return;
        }

        match result {
            Ok(handle) => {
                let endpoint = SessionEndpoint {
                    token: token.clone(),
                    host: self.config.public_host.clone(),
                    port: handle.port(),
                };
                self.entries.insert(
                    token.clone(),
                    Entry::Running(RunningSession {
                        handle,
                        params: pending.params,
                        created_at: pending.created_at,
                        started_at: Utc::now(),
                        started: Instant::now(),
                    }),
                );
                prom::record_session_transition(match pending.origin {
                    LaunchOrigin::Host => SessionTransition::Hosted,
                    LaunchOrigin::Resume => SessionTransition::Resumed,
                });
                self.update_session_gauge();
                info!(
                    target: "sc.actor.registry",
                    token = %token,
                    port = endpoint.port,
                    origin = ?pending.origin,
                    "Session running"
                );
                let _ = pending.respond_to.send(Ok(endpoint));
            }
            Err(e) => {
                if pending.origin == LaunchOrigin::Host {
                    self.delete_artifacts(&token).await;
                }
                prom::record_session_transition(SessionTransition::Failed);
                warn!(target: "sc.actor.registry", token = %token, error = %e, origin = ?pending.origin, "Session failed to start");
                let _ = pending.respond_to.send(Err(e));
            }
        }
    }

    /// The launch was cancelled by `end` or shutdown; undo everything it did.
    async fn unwind_cancelled_launch(
        &mut self,
        token: &Token,
        pending: PendingLaunch,
        result: Result<WorkerHandle, ScError>,
    ) {
        if let Ok(handle) = result {
            handle.stop().await;
        }

        let ended = !pending.end_waiters.is_empty();
        if ended || pending.origin == LaunchOrigin::Host {
            self.delete_artifacts(token).await;
        }

        let error = if ended {
            prom::record_session_transition(SessionTransition::Ended);
            ScError::ConcurrentTeardownConflict(token.to_string())
        } else {
            ScError::ShuttingDown
        };
        info!(target: "sc.actor.registry", token = %token, ended, "Launch unwound");

        let _ = pending.respond_to.send(Err(error));
        for waiter in pending.end_waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn send(&mut self, token: &Token, message: &str) -> Result<(), ScError> {
        let result = match self.entries.get(token) {
            Some(Entry::Running(running)) => running.handle.send(message).await,
            Some(Entry::Provisioning(_)) => {
                return Err(ScError::SessionNotRunning(token.to_string()));
            }
            None => return Err(ScError::SessionNotFound(token.to_string())),
        };

        if let Err(ScError::HandleClosed(_)) = &result {
            self.mark_crashed(token).await;
        }
        result
    }

    async fn end(&mut self, token: Token, respond_to: oneshot::Sender<Result<(), ScError>>) {
        match self.entries.get_mut(&token) {
            Some(Entry::Provisioning(pending)) => {
                debug!(target: "sc.actor.registry", token = %token, "End requested during launch");
                pending.cancel.cancel();
                pending.end_waiters.push(respond_to);
            }
            Some(Entry::Running(_)) => {
                if let Some(Entry::Running(running)) = self.entries.remove(&token) {
                    running.handle.stop().await;
                }
                let result = self.store.delete_all(&token).await;
                prom::record_session_transition(SessionTransition::Ended);
                self.update_session_gauge();
                info!(target: "sc.actor.registry", token = %token, "Session ended");
                let _ = respond_to.send(result);
            }
            None => {
                let _ = respond_to.send(Err(ScError::SessionNotFound(token.to_string())));
            }
        }
    }

    async fn purge(&mut self) -> Result<usize, ScError> {
        // Every entry counts as live, including undetected crashes.
        let active: HashSet<Token> = self.entries.keys().cloned().collect();
        let orphans = self.store.list_orphans(&active).await?;

        let mut purged = 0;
        for token in &orphans {
            match self.store.delete_all(token).await {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!(target: "sc.actor.registry", token = %token, error = %e, "Failed to purge artifacts");
                }
            }
        }

        prom::record_artifacts_purged(purged);
        info!(target: "sc.actor.registry", purged, live = active.len(), "Artifacts purged");
        Ok(purged)
    }

    async fn get(&mut self, token: &Token) -> Result<SessionInfo, ScError> {
        let info = self
            .entries
            .get(token)
            .map(|entry| self.info(token, entry))
            .ok_or_else(|| ScError::SessionNotFound(token.to_string()))?;

        if info.state == SessionState::Crashed {
            self.mark_crashed(token).await;
        }
        Ok(info)
    }

    async fn list(&mut self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .entries
            .iter()
            .map(|(token, entry)| self.info(token, entry))
            .collect();
        sessions.sort_by(|a, b| a.token.cmp(&b.token));

        let crashed: Vec<Token> = sessions
            .iter()
            .filter(|s| s.state == SessionState::Crashed)
            .map(|s| s.token.clone())
            .collect();
        for token in &crashed {
            self.mark_crashed(token).await;
        }
        sessions
    }

    fn info(&self, token: &Token, entry: &Entry) -> SessionInfo {
        match entry {
            Entry::Provisioning(pending) => SessionInfo {
                token: token.clone(),
                host: self.config.public_host.clone(),
                port: None,
                state: SessionState::Provisioning,
                params: pending.params,
                created_at: pending.created_at,
                started_at: None,
            },
            Entry::Running(running) => SessionInfo {
                token: token.clone(),
                host: self.config.public_host.clone(),
                port: Some(running.handle.port()),
                state: if running.handle.is_alive() {
                    SessionState::Running
                } else {
                    SessionState::Crashed
                },
                params: running.params,
                created_at: running.created_at,
                started_at: Some(running.started_at),
            },
        }
    }

    /// Remove a running session whose worker died. Artifacts are kept.
    async fn mark_crashed(&mut self, token: &Token) {
        if let Some(Entry::Running(running)) = self.entries.remove(token) {
            // Releases the port lease.
            running.handle.stop().await;
            prom::record_session_transition(SessionTransition::Crashed);
            self.update_session_gauge();
            warn!(target: "sc.actor.registry", token = %token, "Session worker found dead");
        }
    }

    /// Stop sessions older than the configured maximum age. Artifacts are kept
    /// so the game can be resumed.
    async fn expire_sessions(&mut self) {
        let Some(max_age) = self.config.session_max_age else {
            return;
        };

        let expired: Vec<Token> = self
            .entries
            .iter()
            .filter_map(|(token, entry)| match entry {
                Entry::Running(running) if running.started.elapsed() >= max_age => {
                    Some(token.clone())
                }
                _ => None,
            })
            .collect();

        for token in expired {
            if let Some(Entry::Running(running)) = self.entries.remove(&token) {
                running.handle.stop().await;
                prom::record_session_transition(SessionTransition::Expired);
                info!(target: "sc.actor.registry", token = %token, "Session expired");
            }
        }
        self.update_session_gauge();
    }

    async fn delete_artifacts(&self, token: &Token) {
        if let Err(e) = self.store.delete_all(token).await {
            error!(target: "sc.actor.registry", token = %token, error = %e, "Failed to delete artifacts");
        }
    }

    fn update_session_gauge(&self) {
        let running = self
            .entries
            .values()
            .filter(|entry| matches!(entry, Entry::Running(_)))
            .count();
        self.metrics.set_sessions(running);
    }

    async fn graceful_shutdown(&mut self) {
        if !self.accepting_new {
            return;
        }
        self.accepting_new = false;

        info!(
            target: "sc.actor.registry",
            registry_id = %self.registry_id,
            sessions = self.entries.len(),
            "Performing graceful shutdown"
        );

        let mut in_flight = 0usize;
        for entry in self.entries.values() {
            if let Entry::Provisioning(pending) = entry {
                pending.cancel.cancel();
                in_flight += 1;
            }
        }

        let tokens: Vec<Token> = self.entries.keys().cloned().collect();
        for token in tokens {
            if matches!(self.entries.get(&token), Some(Entry::Running(_))) {
                if let Some(Entry::Running(running)) = self.entries.remove(&token) {
                    running.handle.stop().await;
                    debug!(target: "sc.actor.registry", token = %token, "Worker stopped for shutdown");
                }
            }
        }

        // Cancelled launches still report back; unwind each one.
        let deadline = Instant::now() + LAUNCH_DRAIN_TIMEOUT;
        while in_flight > 0 {
            match tokio::time::timeout_at(deadline, self.outcomes_rx.recv()).await {
                Ok(Some(outcome)) => {
                    in_flight -= 1;
                    self.on_launch_outcome(outcome).await;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(target: "sc.actor.registry", in_flight, "Timed out waiting for launches to unwind");
                    break;
                }
            }
        }

        // Anything left never reported back.
        for (token, entry) in self.entries.drain() {
            if let Entry::Provisioning(pending) = entry {
                warn!(target: "sc.actor.registry", token = %token, "Abandoning launch");
                let _ = pending.respond_to.send(Err(ScError::ShuttingDown));
                for waiter in pending.end_waiters {
                    let _ = waiter.send(Err(ScError::ShuttingDown));
                }
            }
        }

        self.update_session_gauge();
        info!(target: "sc.actor.registry", registry_id = %self.registry_id, "Graceful shutdown complete");
    }
}

//! `VoiceStateReactor` - routes presence events to per-guild scope actors.
//!
//! Each guild gets its own [`ScopeActorHandle`], spawned on first use, so
//! events of one guild are ordered while different guilds proceed
//! concurrently. Registered room systems are remembered here as well, so a
//! scope actor that died is respawned with its lobbies intact.

use super::metrics::{ActorMetrics, ActorType};
use super::scope::ScopeActorHandle;
use crate::channels::{ChannelGroupProvisioner, GroupSummary, NumberLedger, ReadyReport, RoomSystem};
use crate::errors::ScError;
use crate::presence::{PresenceEvent, PresenceOutcome, VoiceStateUpdate};
use common::{ChannelId, GuildId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for each scope actor.
const SCOPE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct ManagedScope {
    handle: ScopeActorHandle,
    task_handle: JoinHandle<()>,
}

#[derive(Default)]
struct ReactorState {
    scopes: HashMap<GuildId, ManagedScope>,
    systems: HashMap<GuildId, HashMap<ChannelId, RoomSystem>>,
}

pub struct VoiceStateReactor {
    state: RwLock<ReactorState>,
    provisioner: Arc<ChannelGroupProvisioner>,
    ledger: Arc<dyn NumberLedger>,
    grace: Duration,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl VoiceStateReactor {
    #[must_use]
    pub fn new(
        provisioner: Arc<ChannelGroupProvisioner>,
        ledger: Arc<dyn NumberLedger>,
        grace: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            state: RwLock::new(ReactorState::default()),
            provisioner,
            ledger,
            grace,
            cancel_token: CancellationToken::new(),
            metrics,
        }
    }

    /// Scope actor for `guild`, spawning or respawning it as needed.
    async fn scope(&self, guild: GuildId) -> Result<ScopeActorHandle, ScError> {
        if self.cancel_token.is_cancelled() {
            return Err(ScError::ShuttingDown);
        }

        {
            let state = self.state.read().await;
            if let Some(managed) = state.scopes.get(&guild) {
                if !managed.task_handle.is_finished() {
                    return Ok(managed.handle.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        if let Some(managed) = state.scopes.get(&guild) {
            if !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }

        if let Some(dead) = state.scopes.remove(&guild) {
            match dead.task_handle.await {
                Err(join_error) if join_error.is_panic() => {
                    error!(target: "sc.reactor", guild = %guild, error = ?join_error, "Scope actor panicked, respawning");
                    self.metrics.record_panic(ActorType::Scope);
                }
                _ => {
                    warn!(target: "sc.reactor", guild = %guild, "Scope actor exited, respawning");
                }
            }
            self.release_orphaned_numbers(guild).await;
        }

        let systems = state
            .systems
            .get(&guild)
            .map(|systems| systems.values().cloned().collect())
            .unwrap_or_default();
        let (handle, task_handle) = ScopeActorHandle::spawn(
            guild,
            systems,
            Arc::clone(&self.provisioner),
            Arc::clone(&self.ledger),
            self.grace,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        state.scopes.insert(
            guild,
            ManagedScope {
                handle: handle.clone(),
                task_handle,
            },
        );
        debug!(target: "sc.reactor", guild = %guild, "Scope actor spawned");
        Ok(handle)
    }

    /// Free the numbers a dead scope actor recorded. Its groups are no longer
    /// tracked, so their channels are logged for manual cleanup.
    async fn release_orphaned_numbers(&self, guild: GuildId) {
        let numbers = match self.ledger.list_active_numbers(guild).await {
            Ok(numbers) => numbers,
            Err(e) => {
                error!(target: "sc.reactor", guild = %guild, error = %e, "Failed to read numbers of dead scope actor");
                return;
            }
        };
        if numbers.is_empty() {
            return;
        }

        warn!(
            target: "sc.reactor",
            guild = %guild,
            numbers = ?numbers,
            "Releasing numbers of groups lost with the scope actor, their channels need cleanup"
        );
        for number in numbers {
            if let Err(e) = self.ledger.release(guild, number).await {
                error!(target: "sc.reactor", guild = %guild, number, error = %e, "Failed to release orphaned number");
            }
        }
    }

    /// Queue the events of a platform voice-state update.
    ///
    /// # Errors
    ///
    /// `ShuttingDown`, or `Internal` if the scope actor is unreachable.
    pub async fn dispatch(&self, update: VoiceStateUpdate) -> Result<(), ScError> {
        let events = update.into_events();
        if events.is_empty() {
            return Ok(());
        }
        let scope = self.scope(update.guild).await?;
        for event in events {
            scope.notify(event).await?;
        }
        Ok(())
    }

    /// Handle one event and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Platform and provisioning errors from the scope actor.
    pub async fn apply(&self, guild: GuildId, event: PresenceEvent) -> Result<PresenceOutcome, ScError> {
        self.scope(guild).await?.apply(event).await
    }

    /// Handle a voice-state update and wait for every outcome.
    ///
    /// # Errors
    ///
    /// The first failing event; later events of the update are not applied.
    pub async fn apply_update(&self, update: VoiceStateUpdate) -> Result<Vec<PresenceOutcome>, ScError> {
        let events = update.into_events();
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let scope = self.scope(update.guild).await?;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(scope.apply(event).await?);
        }
        Ok(outcomes)
    }

    /// # Errors
    ///
    /// `InvalidRequest` if the lobby already has a room system.
    pub async fn register_room_system(&self, guild: GuildId, system: RoomSystem) -> Result<(), ScError> {
        let lobby = system.lobby;
        self.scope(guild).await?.register_system(system.clone()).await?;
        self.state
            .write()
            .await
            .systems
            .entry(guild)
            .or_default()
            .insert(lobby, system);
        Ok(())
    }

    /// Remove a room system and tear down its groups. Returns how many
    /// groups were destroyed.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if no room system uses `lobby`.
    pub async fn remove_room_system(&self, guild: GuildId, lobby: ChannelId) -> Result<usize, ScError> {
        let removed = self.scope(guild).await?.remove_system(lobby).await?;
        if let Some(systems) = self.state.write().await.systems.get_mut(&guild) {
            systems.remove(&lobby);
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// `NotInGroup` unless `user` is in the room owning `channel`.
    pub async fn set_ready(
        &self,
        guild: GuildId,
        channel: ChannelId,
        user: UserId,
        ready: bool,
    ) -> Result<ReadyReport, ScError> {
        self.scope(guild)
            .await?
            .set_ready(channel, user, ready)
            .await
    }

    /// # Errors
    ///
    /// `NotInGroup` if `channel` is not a live group channel.
    pub async fn ready_check(&self, guild: GuildId, channel: ChannelId) -> Result<ReadyReport, ScError> {
        self.scope(guild).await?.ready_check(channel).await
    }

    /// # Errors
    ///
    /// `NotInGroup` unless `user` is a member of the group owning `channel`.
    pub async fn set_locked(
        &self,
        guild: GuildId,
        channel: ChannelId,
        user: UserId,
        locked: bool,
    ) -> Result<(), ScError> {
        self.scope(guild)
            .await?
            .set_locked(channel, user, locked)
            .await
    }

    /// # Errors
    ///
    /// Only channel failures.
    pub async fn groups(&self, guild: GuildId) -> Result<Vec<GroupSummary>, ScError> {
        self.scope(guild).await?.groups().await
    }

    /// Stop every scope actor. Channel groups are left on the platform.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let scopes: Vec<(GuildId, ManagedScope)> =
            self.state.write().await.scopes.drain().collect();
        info!(target: "sc.reactor", scopes = scopes.len(), "Stopping scope actors");

        for (guild, managed) in scopes {
            managed.handle.cancel();
            match tokio::time::timeout(SCOPE_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(target: "sc.reactor", guild = %guild, "Scope actor completed cleanly");
                }
                Ok(Err(e)) => {
                    warn!(target: "sc.reactor", guild = %guild, error = ?e, "Scope actor task failed during shutdown");
                }
                Err(_) => {
                    warn!(target: "sc.reactor", guild = %guild, "Scope actor shutdown timed out");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::channels::{
        Capabilities, ChannelDirectory, ChannelPermissions, ChannelSpec, InMemoryNumberLedger,
        Subject,
    };
    use async_trait::async_trait;
    use common::RoleId;

    /// Platform that accepts everything and creates nothing.
    struct NullPlatform;

    #[async_trait]
    impl ChannelDirectory for NullPlatform {
        async fn create_role(&self, _: GuildId, _: &str, _: bool) -> Result<RoleId, ScError> {
            Ok(RoleId(1))
        }
        async fn delete_role(&self, _: GuildId, _: RoleId) -> Result<(), ScError> {
            Ok(())
        }
        async fn create_channel(&self, _: GuildId, _: &ChannelSpec) -> Result<ChannelId, ScError> {
            Ok(ChannelId(1))
        }
        async fn delete_channel(&self, _: GuildId, _: ChannelId) -> Result<(), ScError> {
            Ok(())
        }
        async fn move_member(&self, _: GuildId, _: UserId, _: ChannelId) -> Result<(), ScError> {
            Ok(())
        }
        async fn add_role(&self, _: GuildId, _: UserId, _: RoleId) -> Result<(), ScError> {
            Ok(())
        }
        async fn remove_role(&self, _: GuildId, _: UserId, _: RoleId) -> Result<(), ScError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ChannelPermissions for NullPlatform {
        async fn grant(&self, _: GuildId, _: ChannelId, _: Subject, _: Capabilities) -> Result<(), ScError> {
            Ok(())
        }
        async fn deny(&self, _: GuildId, _: ChannelId, _: Subject, _: Capabilities) -> Result<(), ScError> {
            Ok(())
        }
        async fn revoke(&self, _: GuildId, _: ChannelId, _: Subject) -> Result<(), ScError> {
            Ok(())
        }
    }

    const GUILD: GuildId = GuildId(7);

    fn reactor(ledger: Arc<InMemoryNumberLedger>) -> VoiceStateReactor {
        let platform = Arc::new(NullPlatform);
        VoiceStateReactor::new(
            Arc::new(ChannelGroupProvisioner::new(platform.clone(), platform)),
            ledger,
            Duration::ZERO,
            ActorMetrics::new(),
        )
    }

    async fn kill_scope(reactor: &VoiceStateReactor, guild: GuildId) {
        reactor
            .state
            .read()
            .await
            .scopes
            .get(&guild)
            .unwrap()
            .handle
            .cancel();
        for _ in 0..100 {
            if reactor.state.read().await.scopes.get(&guild).unwrap().task_handle.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scope actor did not stop");
    }

    #[tokio::test]
    async fn test_respawn_releases_numbers_of_dead_scope() {
        let ledger = Arc::new(InMemoryNumberLedger::new());
        let reactor = reactor(Arc::clone(&ledger));

        assert!(reactor.groups(GUILD).await.unwrap().is_empty());
        ledger.record(GUILD, 1).await.unwrap();
        ledger.record(GUILD, 4).await.unwrap();
        ledger.record(GuildId(8), 2).await.unwrap();

        // A live scope keeps its numbers.
        reactor.groups(GUILD).await.unwrap();
        assert_eq!(ledger.list_active_numbers(GUILD).await.unwrap().len(), 2);

        kill_scope(&reactor, GUILD).await;
        assert!(reactor.groups(GUILD).await.unwrap().is_empty());

        assert!(ledger.list_active_numbers(GUILD).await.unwrap().is_empty());
        assert_eq!(
            ledger.list_active_numbers(GuildId(8)).await.unwrap().len(),
            1
        );
    }
}

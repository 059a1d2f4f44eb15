//! `ScopeActor` - owns every channel group of one guild.
//!
//! Presence events of a guild are handled one at a time, in arrival order.
//! Allocating a number, recording it and provisioning the group happen inside
//! one message, and so do the empty check and teardown of a group, so a join
//! can never interleave with either.
//!
//! Group lifecycle:
//!
//! ```text
//! none ──lobby join──▶ provisioning ──▶ active ──all rooms empty──▶ draining ──grace──▶ none
//!                                         ▲                            │
//!                                         └────────member joins────────┘
//! ```

use super::messages::ScopeMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::allocation::allocate_sequence_number;
use crate::channels::{
    ChannelGroup, ChannelGroupProvisioner, GroupState, GroupSummary, NumberLedger, ReadyReport,
    RoomSystem,
};
use crate::errors::ScError;
use crate::observability::metrics::{self as prom, GroupEvent};
use crate::presence::{PresenceEvent, PresenceOutcome};
use common::{ChannelId, GuildId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for scope mailboxes.
const SCOPE_CHANNEL_BUFFER: usize = 500;

/// Handle to one guild's `ScopeActor`.
#[derive(Clone, Debug)]
pub struct ScopeActorHandle {
    guild: GuildId,
    sender: mpsc::Sender<ScopeMessage>,
    cancel_token: CancellationToken,
}

impl ScopeActorHandle {
    /// Spawn the actor for `guild` with `systems` already registered.
    #[must_use]
    pub fn spawn(
        guild: GuildId,
        systems: Vec<RoomSystem>,
        provisioner: Arc<ChannelGroupProvisioner>,
        ledger: Arc<dyn NumberLedger>,
        grace: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SCOPE_CHANNEL_BUFFER);

        let actor = ScopeActor {
            guild,
            receiver,
            cancel_token: cancel_token.clone(),
            systems: systems.into_iter().map(|s| (s.lobby, s)).collect(),
            groups: BTreeMap::new(),
            voice_index: HashMap::new(),
            text_index: HashMap::new(),
            provisioner,
            ledger,
            grace,
            mailbox: MailboxMonitor::new(ActorType::Scope, guild.to_string()),
            metrics,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                guild,
                sender,
                cancel_token,
            },
            task,
        )
    }

    #[must_use]
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ScError>>) -> ScopeMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Queue a presence event without waiting for it to be handled.
    ///
    /// # Errors
    ///
    /// `Internal` if the actor has exited.
    pub async fn notify(&self, event: PresenceEvent) -> Result<(), ScError> {
        self.sender
            .send(ScopeMessage::Presence {
                event,
                respond_to: None,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))
    }

    /// Handle a presence event and report what happened.
    ///
    /// # Errors
    ///
    /// `ProvisioningFailed` or `Platform` errors from the chat platform.
    pub async fn apply(&self, event: PresenceEvent) -> Result<PresenceOutcome, ScError> {
        self.request(|tx| ScopeMessage::Presence {
            event,
            respond_to: Some(tx),
        })
        .await
    }

    /// # Errors
    ///
    /// `InvalidRequest` if the lobby already has a room system.
    pub async fn register_system(&self, system: RoomSystem) -> Result<(), ScError> {
        self.request(|respond_to| ScopeMessage::RegisterSystem { system, respond_to })
            .await
    }

    /// # Errors
    ///
    /// `InvalidRequest` if no room system uses `lobby`.
    pub async fn remove_system(&self, lobby: ChannelId) -> Result<usize, ScError> {
        self.request(|respond_to| ScopeMessage::RemoveSystem { lobby, respond_to })
            .await
    }

    /// # Errors
    ///
    /// `NotInGroup` unless `user` is in the room owning `channel`.
    pub async fn set_ready(
        &self,
        channel: ChannelId,
        user: UserId,
        ready: bool,
    ) -> Result<ReadyReport, ScError> {
        self.request(|respond_to| ScopeMessage::SetReady {
            channel,
            user,
            ready,
            respond_to,
        })
        .await
    }

    /// # Errors
    ///
    /// `NotInGroup` if `channel` is not a live group channel.
    pub async fn ready_check(&self, channel: ChannelId) -> Result<ReadyReport, ScError> {
        self.request(|respond_to| ScopeMessage::ReadyCheck {
            channel,
            respond_to,
        })
        .await
    }

    /// # Errors
    ///
    /// `NotInGroup` unless `user` is a member of the group owning `channel`.
    pub async fn set_locked(
        &self,
        channel: ChannelId,
        user: UserId,
        locked: bool,
    ) -> Result<(), ScError> {
        self.request(|respond_to| ScopeMessage::SetLocked {
            channel,
            user,
            locked,
            respond_to,
        })
        .await
    }

    /// # Errors
    ///
    /// Only channel failures.
    pub async fn groups(&self) -> Result<Vec<GroupSummary>, ScError> {
        self.request(|respond_to| ScopeMessage::ListGroups { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

struct ScopeActor {
    guild: GuildId,
    receiver: mpsc::Receiver<ScopeMessage>,
    cancel_token: CancellationToken,
    /// Room systems by lobby channel.
    systems: HashMap<ChannelId, RoomSystem>,
    groups: BTreeMap<u32, ChannelGroup>,
    voice_index: HashMap<ChannelId, u32>,
    text_index: HashMap<ChannelId, u32>,
    provisioner: Arc<ChannelGroupProvisioner>,
    ledger: Arc<dyn NumberLedger>,
    grace: Duration,
    mailbox: MailboxMonitor,
    metrics: Arc<ActorMetrics>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ScopeActor {
    #[instrument(skip_all, name = "sc.actor.scope", fields(guild = %self.guild))]
    async fn run(mut self) {
        info!(target: "sc.actor.scope", guild = %self.guild, systems = self.systems.len(), "ScopeActor started");

        loop {
            let next_drain = self.next_drain_deadline();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "sc.actor.scope", guild = %self.guild, "ScopeActor received cancellation signal");
                    break;
                }

                () = sleep_until_opt(next_drain) => {
                    self.teardown_drained().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(target: "sc.actor.scope", guild = %self.guild, "ScopeActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.scope",
            guild = %self.guild,
            groups_remaining = self.groups.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ScopeActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ScopeMessage) {
        match message {
            ScopeMessage::Presence { event, respond_to } => {
                let result = self.on_presence(event).await;
                match respond_to {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(target: "sc.actor.scope", guild = %self.guild, event = ?event, error = %e, "Presence event failed");
                        }
                    }
                }
            }

            ScopeMessage::RegisterSystem { system, respond_to } => {
                let result = self.register_system(system);
                let _ = respond_to.send(result);
            }

            ScopeMessage::RemoveSystem { lobby, respond_to } => {
                let result = self.remove_system(lobby).await;
                let _ = respond_to.send(result);
            }

            ScopeMessage::SetReady {
                channel,
                user,
                ready,
                respond_to,
            } => {
                let result = self.set_ready(channel, user, ready);
                let _ = respond_to.send(result);
            }

            ScopeMessage::ReadyCheck {
                channel,
                respond_to,
            } => {
                let result = self.ready_check(channel);
                let _ = respond_to.send(result);
            }

            ScopeMessage::SetLocked {
                channel,
                user,
                locked,
                respond_to,
            } => {
                let result = self.set_locked(channel, user, locked).await;
                let _ = respond_to.send(result);
            }

            ScopeMessage::ListGroups { respond_to } => {
                let groups = self.groups.values().map(ChannelGroup::summary).collect();
                let _ = respond_to.send(Ok(groups));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------------

    async fn on_presence(&mut self, event: PresenceEvent) -> Result<PresenceOutcome, ScError> {
        match event {
            PresenceEvent::Joined { user, channel } => {
                if let Some(system) = self.systems.get(&channel).cloned() {
                    return self.provision_for(user, &system).await;
                }
                match self.voice_index.get(&channel).copied() {
                    Some(number) => self.on_room_joined(number, channel, user).await,
                    None => Ok(PresenceOutcome::Ignored),
                }
            }
            PresenceEvent::Left { user, channel } => match self.voice_index.get(&channel).copied() {
                Some(number) => self.on_room_left(number, channel, user).await,
                None => Ok(PresenceOutcome::Ignored),
            },
        }
    }

    /// Allocate, record and provision a new group for a lobby join.
    async fn provision_for(
        &mut self,
        user: UserId,
        system: &RoomSystem,
    ) -> Result<PresenceOutcome, ScError> {
        let mut taken = self.ledger.list_active_numbers(self.guild).await?;
        taken.extend(self.groups.keys().copied());
        let number = allocate_sequence_number(taken);

        self.ledger.record(self.guild, number).await?;
        debug!(target: "sc.actor.scope", guild = %self.guild, number, user = %user, "Number reserved");

        match self
            .provisioner
            .provision(self.guild, number, system, user)
            .await
        {
            Ok(group) => {
                for voice in group.voice_channels() {
                    self.voice_index.insert(voice, number);
                }
                for text in group.text_channels() {
                    self.text_index.insert(text, number);
                }
                self.groups.insert(number, group);
                self.metrics.group_created();
                Ok(PresenceOutcome::Provisioned { number })
            }
            Err(e) => {
                self.release_number(number).await;
                Err(e)
            }
        }
    }

    async fn on_room_joined(
        &mut self,
        number: u32,
        voice: ChannelId,
        user: UserId,
    ) -> Result<PresenceOutcome, ScError> {
        let Some(group) = self.groups.get_mut(&number) else {
            return Ok(PresenceOutcome::Ignored);
        };
        let Some(room) = group.room_by_voice_mut(voice) else {
            return Ok(PresenceOutcome::Ignored);
        };
        room.join(user);
        let label = room.label;

        let aborted = group.state == GroupState::Draining;
        if aborted {
            group.state = GroupState::Active;
            group.drain_deadline = None;
            prom::record_channel_group_event(GroupEvent::TeardownAborted);
            info!(target: "sc.actor.scope", guild = %self.guild, number, user = %user, "Teardown aborted");
        }

        self.provisioner
            .grant_room_access(group, label, user)
            .await?;

        Ok(if aborted {
            PresenceOutcome::TeardownAborted { number }
        } else {
            PresenceOutcome::Granted { number }
        })
    }

    async fn on_room_left(
        &mut self,
        number: u32,
        voice: ChannelId,
        user: UserId,
    ) -> Result<PresenceOutcome, ScError> {
        let Some(group) = self.groups.get_mut(&number) else {
            return Ok(PresenceOutcome::Ignored);
        };
        let Some(room) = group.room_by_voice_mut(voice) else {
            return Ok(PresenceOutcome::Ignored);
        };
        room.leave(user);
        let label = room.label;

        if let Err(e) = self.provisioner.revoke_room_access(group, label, user).await {
            // Teardown below must still run.
            warn!(target: "sc.actor.scope", guild = %self.guild, number, user = %user, error = %e, "Failed to revoke room access");
        }

        if !group.is_empty() {
            return Ok(PresenceOutcome::Revoked { number });
        }

        if self.grace.is_zero() {
            self.teardown(number).await;
            return Ok(PresenceOutcome::TornDown { number });
        }

        group.state = GroupState::Draining;
        group.drain_deadline = Some(Instant::now() + self.grace);
        debug!(target: "sc.actor.scope", guild = %self.guild, number, grace_secs = self.grace.as_secs(), "Group draining");
        Ok(PresenceOutcome::Draining { number })
    }

    fn next_drain_deadline(&self) -> Option<Instant> {
        self.groups
            .values()
            .filter_map(|group| group.drain_deadline)
            .min()
    }

    async fn teardown_drained(&mut self) {
        let now = Instant::now();
        let due: Vec<u32> = self
            .groups
            .values()
            .filter(|group| {
                group.state == GroupState::Draining
                    && group.is_empty()
                    && group.drain_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|group| group.number)
            .collect();

        for number in due {
            self.teardown(number).await;
        }
    }

    /// Destroy group `number` and free its number.
    async fn teardown(&mut self, number: u32) {
        let Some(mut group) = self.groups.remove(&number) else {
            return;
        };
        group.state = GroupState::Draining;

        for voice in group.voice_channels() {
            self.voice_index.remove(&voice);
        }
        for text in group.text_channels() {
            self.text_index.remove(&text);
        }

        if let Err(e) = self.provisioner.destroy(&group).await {
            error!(target: "sc.actor.scope", guild = %self.guild, number, error = %e, "Group teardown incomplete");
        }
        self.release_number(number).await;
        self.metrics.group_removed();
    }

    async fn release_number(&self, number: u32) {
        if let Err(e) = self.ledger.release(self.guild, number).await {
            error!(target: "sc.actor.scope", guild = %self.guild, number, error = %e, "Failed to release group number");
        }
    }

    // ------------------------------------------------------------------------
    // Room systems
    // ------------------------------------------------------------------------

    fn register_system(&mut self, system: RoomSystem) -> Result<(), ScError> {
        if self.systems.contains_key(&system.lobby) {
            return Err(ScError::InvalidRequest(format!(
                "channel {} already has a room system",
                system.lobby
            )));
        }
        info!(target: "sc.actor.scope", guild = %self.guild, lobby = %system.lobby, topology = ?system.topology, "Room system registered");
        self.systems.insert(system.lobby, system);
        Ok(())
    }

    async fn remove_system(&mut self, lobby: ChannelId) -> Result<usize, ScError> {
        if self.systems.remove(&lobby).is_none() {
            return Err(ScError::InvalidRequest(format!(
                "channel {lobby} has no room system"
            )));
        }

        let owned: Vec<u32> = self
            .groups
            .values()
            .filter(|group| group.lobby == lobby)
            .map(|group| group.number)
            .collect();
        for &number in &owned {
            self.teardown(number).await;
        }

        info!(target: "sc.actor.scope", guild = %self.guild, lobby = %lobby, groups = owned.len(), "Room system removed");
        Ok(owned.len())
    }

    // ------------------------------------------------------------------------
    // Ready checks and locks
    // ------------------------------------------------------------------------

    fn set_ready(
        &mut self,
        channel: ChannelId,
        user: UserId,
        ready: bool,
    ) -> Result<ReadyReport, ScError> {
        let number = self.group_number_for(channel)?;
        let room = self
            .groups
            .get_mut(&number)
            .and_then(|group| group.room_by_text_mut(channel))
            .ok_or(ScError::NotInGroup)?;

        if !room.occupants.contains(&user) {
            return Err(ScError::NotInGroup);
        }
        if ready {
            room.ready.insert(user);
        } else {
            room.ready.remove(&user);
        }
        Ok(room.ready_report())
    }

    fn ready_check(&self, channel: ChannelId) -> Result<ReadyReport, ScError> {
        let number = self.group_number_for(channel)?;
        self.groups
            .get(&number)
            .and_then(|group| group.room_by_channel(channel))
            .map(crate::channels::Room::ready_report)
            .ok_or(ScError::NotInGroup)
    }

    async fn set_locked(
        &mut self,
        channel: ChannelId,
        user: UserId,
        locked: bool,
    ) -> Result<(), ScError> {
        let number = self.group_number_for(channel)?;
        let group = self.groups.get_mut(&number).ok_or(ScError::NotInGroup)?;
        if !group.is_member(user) {
            return Err(ScError::NotInGroup);
        }

        if locked {
            self.provisioner.lock(group).await?;
        } else {
            self.provisioner.unlock(group).await?;
        }
        for room in &mut group.rooms {
            room.locked = locked;
        }
        info!(target: "sc.actor.scope", guild = %self.guild, number, user = %user, locked, "Group lock changed");
        Ok(())
    }

    /// Group owning a text channel (ready checks) or voice channel.
    fn group_number_for(&self, channel: ChannelId) -> Result<u32, ScError> {
        self.text_index
            .get(&channel)
            .or_else(|| self.voice_index.get(&channel))
            .copied()
            .ok_or(ScError::NotInGroup)
    }
}

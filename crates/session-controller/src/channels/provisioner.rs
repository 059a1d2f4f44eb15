//! Creates and destroys channel groups and applies access grants.
//!
//! Access model:
//!
//! - every group text channel denies `read` to everyone
//! - single room: a mentionable member role (read/write on the text channel)
//!   is given to whoever is in the room, plus a per-user text grant
//! - paired: an admin role (read/write/manage on both text channels) goes to
//!   the creator; being in room A or B grants read/write on that room's text
//!   channel only

use super::group::{ChannelGroup, GroupState, Room};
use super::topology::{RoomLabel, RoomSystem, Topology};
use super::{Capabilities, ChannelDirectory, ChannelKind, ChannelPermissions, ChannelSpec, Subject};
use crate::errors::ScError;
use crate::observability::metrics::{self, GroupEvent};
use common::{ChannelId, GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Platform objects created by one provisioning attempt, in creation order.
#[derive(Debug, Default)]
struct Created {
    roles: Vec<RoleId>,
    channels: Vec<ChannelId>,
}

pub struct ChannelGroupProvisioner {
    directory: Arc<dyn ChannelDirectory>,
    permissions: Arc<dyn ChannelPermissions>,
}

impl ChannelGroupProvisioner {
    #[must_use]
    pub fn new(directory: Arc<dyn ChannelDirectory>, permissions: Arc<dyn ChannelPermissions>) -> Self {
        Self {
            directory,
            permissions,
        }
    }

    /// Create group `number` for `system` and move `creator` into its first room.
    ///
    /// On failure everything created by this attempt is deleted again before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// `ScError::ProvisioningFailed` wrapping the first platform error.
    #[instrument(skip_all, name = "sc.channels.provision", fields(guild = %guild, number))]
    pub async fn provision(
        &self,
        guild: GuildId,
        number: u32,
        system: &RoomSystem,
        creator: UserId,
    ) -> Result<ChannelGroup, ScError> {
        let mut created = Created::default();

        match self
            .try_provision(guild, number, system, creator, &mut created)
            .await
        {
            Ok(group) => {
                metrics::record_channel_group_event(GroupEvent::Provisioned);
                info!(
                    target: "sc.channels",
                    guild = %guild,
                    number,
                    topology = ?system.topology,
                    creator = %creator,
                    "Channel group provisioned"
                );
                Ok(group)
            }
            Err(e) => {
                warn!(target: "sc.channels", guild = %guild, number, error = %e, "Provisioning failed, rolling back");
                self.rollback(guild, created).await;
                metrics::record_channel_group_event(GroupEvent::Rollback);
                Err(ScError::ProvisioningFailed(e.to_string()))
            }
        }
    }

    async fn try_provision(
        &self,
        guild: GuildId,
        number: u32,
        system: &RoomSystem,
        creator: UserId,
        created: &mut Created,
    ) -> Result<ChannelGroup, ScError> {
        let topology = system.topology;
        let role_name = system.naming.role_name(number, topology);
        let role = self
            .directory
            .create_role(guild, &role_name, topology == Topology::SingleRoom)
            .await?;
        created.roles.push(role);

        let role_caps = match topology {
            Topology::SingleRoom => Capabilities::READ_WRITE,
            Topology::Paired => Capabilities::ADMIN,
        };

        let mut rooms = Vec::with_capacity(topology.labels().len());
        for &label in topology.labels() {
            let voice = self
                .directory
                .create_channel(
                    guild,
                    &ChannelSpec {
                        name: system.naming.voice_name(number, label),
                        kind: ChannelKind::Voice,
                        parent: system.category,
                    },
                )
                .await?;
            created.channels.push(voice);

            let text = self
                .directory
                .create_channel(
                    guild,
                    &ChannelSpec {
                        name: system.naming.text_name(number, label),
                        kind: ChannelKind::Text,
                        parent: system.category,
                    },
                )
                .await?;
            created.channels.push(text);

            self.permissions
                .deny(guild, text, Subject::Everyone, Capabilities::READ)
                .await?;
            self.permissions
                .grant(guild, text, Subject::Role(role), role_caps)
                .await?;

            rooms.push(Room::new(label, voice, text));
        }

        let mut group = ChannelGroup {
            guild,
            number,
            lobby: system.lobby,
            topology,
            role,
            creator,
            rooms,
            state: GroupState::Provisioning,
            drain_deadline: None,
        };

        let first = group
            .rooms
            .first()
            .map(|room| (room.label, room.voice))
            .ok_or_else(|| ScError::Internal("topology without rooms".to_string()))?;

        self.directory.add_role(guild, creator, role).await?;
        if topology == Topology::SingleRoom {
            self.grant_room_access(&group, first.0, creator).await?;
        }
        self.directory.move_member(guild, creator, first.1).await?;

        if let Some(room) = group.room_by_voice_mut(first.1) {
            room.join(creator);
        }
        group.state = GroupState::Active;
        Ok(group)
    }

    /// Best-effort delete, newest first.
    async fn rollback(&self, guild: GuildId, created: Created) {
        for channel in created.channels.into_iter().rev() {
            if let Err(e) = self.directory.delete_channel(guild, channel).await {
                warn!(target: "sc.channels", guild = %guild, channel = %channel, error = %e, "Rollback failed to delete channel");
            }
        }
        for role in created.roles.into_iter().rev() {
            if let Err(e) = self.directory.delete_role(guild, role).await {
                warn!(target: "sc.channels", guild = %guild, role = %role, error = %e, "Rollback failed to delete role");
            }
        }
    }

    /// Delete every channel and the role of `group`.
    ///
    /// Keeps going after a failure so one stuck channel does not leak the rest.
    ///
    /// # Errors
    ///
    /// The first platform error, after all deletions were attempted.
    #[instrument(skip_all, name = "sc.channels.destroy", fields(guild = %group.guild, number = group.number))]
    pub async fn destroy(&self, group: &ChannelGroup) -> Result<(), ScError> {
        let mut first_error = None;

        let channels = group.text_channels().chain(group.voice_channels());
        for channel in channels {
            if let Err(e) = self.directory.delete_channel(group.guild, channel).await {
                warn!(target: "sc.channels", guild = %group.guild, channel = %channel, error = %e, "Failed to delete channel");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.directory.delete_role(group.guild, group.role).await {
            warn!(target: "sc.channels", guild = %group.guild, role = %group.role, error = %e, "Failed to delete role");
            first_error.get_or_insert(e);
        }

        metrics::record_channel_group_event(GroupEvent::TornDown);
        info!(target: "sc.channels", guild = %group.guild, number = group.number, "Channel group destroyed");

        first_error.map_or(Ok(()), Err)
    }

    /// Give `user` access to the text channel of room `label`.
    ///
    /// # Errors
    ///
    /// Platform errors from the collaborators.
    pub async fn grant_room_access(
        &self,
        group: &ChannelGroup,
        label: RoomLabel,
        user: UserId,
    ) -> Result<(), ScError> {
        let text = room_text(group, label)?;
        if group.topology == Topology::SingleRoom {
            self.directory.add_role(group.guild, user, group.role).await?;
        }
        self.permissions
            .grant(group.guild, text, Subject::User(user), Capabilities::READ_WRITE)
            .await?;
        debug!(target: "sc.channels", guild = %group.guild, number = group.number, user = %user, room = ?label, "Room access granted");
        Ok(())
    }

    /// Take away what [`grant_room_access`](Self::grant_room_access) gave.
    /// The paired admin role stays with the creator.
    ///
    /// # Errors
    ///
    /// Platform errors from the collaborators.
    pub async fn revoke_room_access(
        &self,
        group: &ChannelGroup,
        label: RoomLabel,
        user: UserId,
    ) -> Result<(), ScError> {
        let text = room_text(group, label)?;
        self.permissions
            .revoke(group.guild, text, Subject::User(user))
            .await?;
        if group.topology == Topology::SingleRoom {
            self.directory
                .remove_role(group.guild, user, group.role)
                .await?;
        }
        debug!(target: "sc.channels", guild = %group.guild, number = group.number, user = %user, room = ?label, "Room access revoked");
        Ok(())
    }

    /// Deny `connect` to everyone on the group's voice channels. Members
    /// already connected stay.
    ///
    /// # Errors
    ///
    /// Platform errors from the collaborators.
    pub async fn lock(&self, group: &ChannelGroup) -> Result<(), ScError> {
        for voice in group.voice_channels() {
            self.permissions
                .deny(group.guild, voice, Subject::Everyone, Capabilities::CONNECT)
                .await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Platform errors from the collaborators.
    pub async fn unlock(&self, group: &ChannelGroup) -> Result<(), ScError> {
        for voice in group.voice_channels() {
            self.permissions
                .revoke(group.guild, voice, Subject::Everyone)
                .await?;
        }
        Ok(())
    }
}

fn room_text(group: &ChannelGroup, label: RoomLabel) -> Result<ChannelId, ScError> {
    group
        .rooms
        .iter()
        .find(|room| room.label == label)
        .map(|room| room.text)
        .ok_or_else(|| ScError::Internal(format!("group {} has no room {label:?}", group.number)))
}

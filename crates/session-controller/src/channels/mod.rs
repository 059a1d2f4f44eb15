//! Ephemeral channel groups on the chat platform.
//!
//! The platform itself sits behind two collaborators: [`ChannelDirectory`]
//! creates and deletes roles and channels, [`ChannelPermissions`] applies
//! capability grants. This module only decides who gets which capability and
//! when; the platform-specific representation stays in the adapter.
//!
//! - [`topology`] - room layouts and naming
//! - [`group`] - live group state
//! - [`provisioner`] - create/destroy groups, grant/revoke access
//! - [`ledger`] - sequence numbers in use per guild

pub mod group;
pub mod ledger;
pub mod provisioner;
pub mod topology;

pub use group::{ChannelGroup, GroupState, GroupSummary, ReadyReport, Room, RoomSummary};
pub use ledger::{InMemoryNumberLedger, NumberLedger};
pub use provisioner::ChannelGroupProvisioner;
pub use topology::{GroupNaming, RoomLabel, RoomSystem, Topology};

use crate::errors::ScError;
use async_trait::async_trait;
use common::{ChannelId, GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Voice,
    Text,
}

/// A channel to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
    /// Category to create the channel under.
    pub parent: Option<ChannelId>,
}

/// Who a permission entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Everyone,
    Role(RoleId),
    User(UserId),
}

/// Capability set applied to one (channel, subject) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub connect: bool,
    pub manage: bool,
}

impl Capabilities {
    pub const READ: Self = Self {
        read: true,
        write: false,
        connect: false,
        manage: false,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        connect: false,
        manage: false,
    };

    pub const ADMIN: Self = Self {
        read: true,
        write: true,
        connect: false,
        manage: true,
    };

    pub const CONNECT: Self = Self {
        read: false,
        write: false,
        connect: true,
        manage: false,
    };
}

/// Role and channel management on the platform.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        mentionable: bool,
    ) -> Result<RoleId, ScError>;

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> Result<(), ScError>;

    async fn create_channel(&self, guild: GuildId, spec: &ChannelSpec)
        -> Result<ChannelId, ScError>;

    async fn delete_channel(&self, guild: GuildId, channel: ChannelId) -> Result<(), ScError>;

    /// Move a member who is connected to voice into `channel`.
    async fn move_member(
        &self,
        guild: GuildId,
        user: UserId,
        channel: ChannelId,
    ) -> Result<(), ScError>;

    async fn add_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ScError>;

    async fn remove_role(&self, guild: GuildId, user: UserId, role: RoleId)
        -> Result<(), ScError>;
}

/// Per-channel permission entries on the platform.
#[async_trait]
pub trait ChannelPermissions: Send + Sync {
    /// Allow `capabilities` for `subject`, replacing any previous entry.
    async fn grant(
        &self,
        guild: GuildId,
        channel: ChannelId,
        subject: Subject,
        capabilities: Capabilities,
    ) -> Result<(), ScError>;

    /// Deny `capabilities` for `subject`, replacing any previous entry.
    async fn deny(
        &self,
        guild: GuildId,
        channel: ChannelId,
        subject: Subject,
        capabilities: Capabilities,
    ) -> Result<(), ScError>;

    /// Remove the entry for `subject`. Removing a missing entry is not an error.
    async fn revoke(
        &self,
        guild: GuildId,
        channel: ChannelId,
        subject: Subject,
    ) -> Result<(), ScError>;
}

//! Voice presence events.
//!
//! The platform reports voice-state changes as `(before, after)` channel
//! pairs. They are translated into typed [`PresenceEvent`]s here and queued
//! per guild to the scope actor.

use common::{ChannelId, GuildId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    Joined { user: UserId, channel: ChannelId },
    Left { user: UserId, channel: ChannelId },
}

impl PresenceEvent {
    #[must_use]
    pub fn user(&self) -> UserId {
        match self {
            PresenceEvent::Joined { user, .. } | PresenceEvent::Left { user, .. } => *user,
        }
    }

    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match self {
            PresenceEvent::Joined { channel, .. } | PresenceEvent::Left { channel, .. } => *channel,
        }
    }
}

/// A raw voice-state update from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild: GuildId,
    pub user: UserId,
    /// Voice channel before the update, if connected.
    pub before: Option<ChannelId>,
    /// Voice channel after the update, if connected.
    pub after: Option<ChannelId>,
}

impl VoiceStateUpdate {
    /// `Joined(after)` then `Left(before)`. Updates that keep the channel
    /// (mute, deafen, streaming) produce nothing.
    ///
    /// The join goes first so a member moving between rooms of one group is
    /// already counted in the new room when the old room's empty check runs.
    #[must_use]
    pub fn into_events(self) -> Vec<PresenceEvent> {
        if self.before == self.after {
            return Vec::new();
        }
        let left = self.before.map(|channel| PresenceEvent::Left {
            user: self.user,
            channel,
        });
        let joined = self.after.map(|channel| PresenceEvent::Joined {
            user: self.user,
            channel,
        });
        joined.into_iter().chain(left).collect()
    }
}

/// What the scope actor did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PresenceOutcome {
    /// Channel is neither a lobby nor part of a group.
    Ignored,
    /// A lobby join created a group.
    Provisioned { number: u32 },
    /// Joined a group room; text access granted.
    Granted { number: u32 },
    /// Left a group room that still has members.
    Revoked { number: u32 },
    /// Group is empty and waiting out its grace period.
    Draining { number: u32 },
    /// Group was empty and has been destroyed.
    TornDown { number: u32 },
    /// A member joined a draining group; teardown cancelled.
    TeardownAborted { number: u32 },
}

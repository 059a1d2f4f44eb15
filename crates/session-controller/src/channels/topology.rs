//! Room layouts and channel naming.

use common::ChannelId;
use serde::{Deserialize, Serialize};

/// How many voice/text pairs a group has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// One voice/text pair and a member role.
    SingleRoom,
    /// Rooms A and B sharing one number and an admin role.
    Paired,
}

impl Topology {
    #[must_use]
    pub const fn labels(&self) -> &'static [RoomLabel] {
        match self {
            Topology::SingleRoom => &[RoomLabel::Only],
            Topology::Paired => &[RoomLabel::A, RoomLabel::B],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomLabel {
    Only,
    A,
    B,
}

impl RoomLabel {
    /// Suffix appended to the group number in voice channel names.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            RoomLabel::Only => "",
            RoomLabel::A => "A",
            RoomLabel::B => "B",
        }
    }
}

/// Name prefixes for a room system's channels and roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNaming {
    /// e.g. `"Game Room"`.
    pub voice_prefix: String,
    /// e.g. `"game-room"`.
    pub text_prefix: String,
}

impl GroupNaming {
    #[must_use]
    pub fn new(voice_prefix: impl Into<String>, text_prefix: impl Into<String>) -> Self {
        Self {
            voice_prefix: voice_prefix.into(),
            text_prefix: text_prefix.into(),
        }
    }

    #[must_use]
    pub fn game_rooms() -> Self {
        Self::new("Game Room", "game-room")
    }

    #[must_use]
    pub fn racing() -> Self {
        Self::new("Racing Channel", "racing-channel")
    }

    #[must_use]
    pub fn voice_name(&self, number: u32, label: RoomLabel) -> String {
        format!("{} {number}{}", self.voice_prefix, label.suffix())
    }

    #[must_use]
    pub fn text_name(&self, number: u32, label: RoomLabel) -> String {
        format!(
            "{}-{number}{}",
            self.text_prefix,
            label.suffix().to_ascii_lowercase()
        )
    }

    #[must_use]
    pub fn role_name(&self, number: u32, topology: Topology) -> String {
        match topology {
            Topology::SingleRoom => format!("{} {number}", self.voice_prefix),
            Topology::Paired => format!("{} {number} Admin", self.voice_prefix),
        }
    }
}

/// A lobby voice channel whose join events provision new groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSystem {
    pub lobby: ChannelId,
    /// Category new channels are created under.
    pub category: Option<ChannelId>,
    pub topology: Topology,
    pub naming: GroupNaming,
}

impl RoomSystem {
    /// General multiplayer rooms.
    #[must_use]
    pub fn single_room(lobby: ChannelId, category: Option<ChannelId>) -> Self {
        Self {
            lobby,
            category,
            topology: Topology::SingleRoom,
            naming: GroupNaming::game_rooms(),
        }
    }

    /// Competitive A/B races.
    #[must_use]
    pub fn paired(lobby: ChannelId, category: Option<ChannelId>) -> Self {
        Self {
            lobby,
            category,
            topology: Topology::Paired,
            naming: GroupNaming::racing(),
        }
    }
}

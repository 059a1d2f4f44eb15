//! Pre-configured test data for SC testing.
//!
//! Provides:
//! - Platform ids (guilds, lobbies, categories, users)
//! - Sample game data artifacts
//! - Room systems for both topologies

use bytes::Bytes;
use common::{ChannelId, GuildId, UserId};
use session_controller::channels::{GroupNaming, RoomSystem};
use session_controller::presence::VoiceStateUpdate;

pub const GUILD: GuildId = GuildId(100);
pub const OTHER_GUILD: GuildId = GuildId(200);

/// Lobby of the single-room system.
pub const LOBBY: ChannelId = ChannelId(1_001);
/// Lobby of the paired (racing) system.
pub const RACING_LOBBY: ChannelId = ChannelId(1_002);
pub const CATEGORY: ChannelId = ChannelId(1_000);
/// A voice channel no room system knows about.
pub const AFK: ChannelId = ChannelId(1_999);

pub const ALICE: UserId = UserId(501);
pub const BOB: UserId = UserId(502);
pub const CAROL: UserId = UserId(503);
pub const OPERATOR: UserId = UserId(900);

/// A generated game data file.
pub fn sample_game_data() -> Bytes {
    Bytes::from_static(b"AP_MULTIDATA\x00\x01seed=42;players=3")
}

/// A save written by a worker.
pub fn sample_save() -> Bytes {
    Bytes::from_static(b"AP_SAVE\x00checkpoint=7")
}

pub fn single_room_system(lobby: ChannelId) -> RoomSystem {
    RoomSystem::single_room(lobby, Some(CATEGORY))
}

pub fn paired_system(lobby: ChannelId) -> RoomSystem {
    RoomSystem::paired(lobby, Some(CATEGORY))
}

/// Single-room system with custom channel prefixes.
pub fn custom_system(lobby: ChannelId, voice_prefix: &str, text_prefix: &str) -> RoomSystem {
    RoomSystem {
        naming: GroupNaming::new(voice_prefix, text_prefix),
        ..RoomSystem::single_room(lobby, None)
    }
}

/// `user` connects to `channel` from nowhere.
pub fn joined(guild: GuildId, user: UserId, channel: ChannelId) -> VoiceStateUpdate {
    VoiceStateUpdate {
        guild,
        user,
        before: None,
        after: Some(channel),
    }
}

/// `user` disconnects from `channel`.
pub fn left(guild: GuildId, user: UserId, channel: ChannelId) -> VoiceStateUpdate {
    VoiceStateUpdate {
        guild,
        user,
        before: Some(channel),
        after: None,
    }
}

/// `user` switches from `from` to `to`.
pub fn moved(guild: GuildId, user: UserId, from: ChannelId, to: ChannelId) -> VoiceStateUpdate {
    VoiceStateUpdate {
        guild,
        user,
        before: Some(from),
        after: Some(to),
    }
}

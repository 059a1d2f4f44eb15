//! Common types shared across Gatehouse components.

#![warn(clippy::pedantic)]

/// Module for chat-platform identifier types
pub mod types;

pub use types::{ChannelId, GuildId, ParseIdError, RoleId, UserId};

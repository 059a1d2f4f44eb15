//! Live channel group state, owned by a guild's scope actor.

use super::topology::{RoomLabel, Topology};
use common::{ChannelId, GuildId, RoleId, UserId};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    /// Channels are being created; the number is already reserved.
    Provisioning,
    Active,
    /// Every room is empty; teardown is pending.
    Draining,
}

/// One voice/text pair of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub label: RoomLabel,
    pub voice: ChannelId,
    pub text: ChannelId,
    /// Users connected to `voice`.
    pub occupants: BTreeSet<UserId>,
    /// Occupants who marked themselves ready.
    pub ready: BTreeSet<UserId>,
    pub locked: bool,
}

impl Room {
    #[must_use]
    pub fn new(label: RoomLabel, voice: ChannelId, text: ChannelId) -> Self {
        Self {
            label,
            voice,
            text,
            occupants: BTreeSet::new(),
            ready: BTreeSet::new(),
            locked: false,
        }
    }

    pub fn join(&mut self, user: UserId) {
        self.occupants.insert(user);
    }

    /// Remove an occupant and their ready mark.
    pub fn leave(&mut self, user: UserId) {
        self.occupants.remove(&user);
        self.ready.remove(&user);
    }

    #[must_use]
    pub fn ready_report(&self) -> ReadyReport {
        let ready: Vec<UserId> = self.ready.iter().copied().collect();
        let not_ready: Vec<UserId> = self
            .occupants
            .iter()
            .filter(|user| !self.ready.contains(user))
            .copied()
            .collect();
        ReadyReport {
            all_ready: !ready.is_empty() && not_ready.is_empty(),
            ready,
            not_ready,
        }
    }
}

/// Result of a ready toggle or ready check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyReport {
    pub ready: Vec<UserId>,
    pub not_ready: Vec<UserId>,
    pub all_ready: bool,
}

/// A numbered group of rooms.
#[derive(Debug, Clone)]
pub struct ChannelGroup {
    pub guild: GuildId,
    pub number: u32,
    /// Lobby of the room system that created the group.
    pub lobby: ChannelId,
    pub topology: Topology,
    /// Member role (single room) or admin role (paired).
    pub role: RoleId,
    pub creator: UserId,
    pub rooms: Vec<Room>,
    pub state: GroupState,
    /// Set while draining with a grace period.
    pub drain_deadline: Option<Instant>,
}

impl ChannelGroup {
    #[must_use]
    pub fn room_by_voice(&self, channel: ChannelId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.voice == channel)
    }

    pub fn room_by_voice_mut(&mut self, channel: ChannelId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|room| room.voice == channel)
    }

    pub fn room_by_text_mut(&mut self, channel: ChannelId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|room| room.text == channel)
    }

    /// Find a room by either of its channels.
    #[must_use]
    pub fn room_by_channel(&self, channel: ChannelId) -> Option<&Room> {
        self.rooms
            .iter()
            .find(|room| room.voice == channel || room.text == channel)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.iter().all(|room| room.occupants.is_empty())
    }

    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.rooms.iter().any(|room| room.occupants.contains(&user))
    }

    pub fn voice_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.rooms.iter().map(|room| room.voice)
    }

    pub fn text_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.rooms.iter().map(|room| room.text)
    }

    #[must_use]
    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            number: self.number,
            lobby: self.lobby,
            topology: self.topology,
            state: self.state,
            rooms: self
                .rooms
                .iter()
                .map(|room| RoomSummary {
                    label: room.label,
                    voice: room.voice,
                    text: room.text,
                    occupants: room.occupants.iter().copied().collect(),
                    locked: room.locked,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub label: RoomLabel,
    pub voice: ChannelId,
    pub text: ChannelId,
    pub occupants: Vec<UserId>,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub number: u32,
    pub lobby: ChannelId,
    pub topology: Topology,
    pub state: GroupState,
    pub rooms: Vec<RoomSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_group() -> ChannelGroup {
        ChannelGroup {
            guild: GuildId(1),
            number: 1,
            lobby: ChannelId(10),
            topology: Topology::Paired,
            role: RoleId(100),
            creator: UserId(7),
            rooms: vec![
                Room::new(RoomLabel::A, ChannelId(11), ChannelId(12)),
                Room::new(RoomLabel::B, ChannelId(13), ChannelId(14)),
            ],
            state: GroupState::Active,
            drain_deadline: None,
        }
    }

    #[test]
    fn test_group_empty_only_when_every_room_empty() {
        let mut group = paired_group();
        assert!(group.is_empty());

        if let Some(room) = group.room_by_voice_mut(ChannelId(13)) {
            room.join(UserId(7));
        }
        assert!(!group.is_empty());
        assert!(group.is_member(UserId(7)));

        if let Some(room) = group.room_by_voice_mut(ChannelId(13)) {
            room.leave(UserId(7));
        }
        assert!(group.is_empty());
    }

    #[test]
    fn test_room_lookup_by_channel() {
        let group = paired_group();
        assert_eq!(group.room_by_channel(ChannelId(14)).map(|r| r.label), Some(RoomLabel::B));
        assert_eq!(group.room_by_voice(ChannelId(11)).map(|r| r.label), Some(RoomLabel::A));
        assert!(group.room_by_channel(ChannelId(99)).is_none());
    }

    #[test]
    fn test_ready_report() {
        let mut room = Room::new(RoomLabel::Only, ChannelId(1), ChannelId(2));
        assert!(!room.ready_report().all_ready);

        room.join(UserId(1));
        room.join(UserId(2));
        room.ready.insert(UserId(1));

        let report = room.ready_report();
        assert_eq!(report.ready, vec![UserId(1)]);
        assert_eq!(report.not_ready, vec![UserId(2)]);
        assert!(!report.all_ready);

        room.leave(UserId(2));
        assert!(room.ready_report().all_ready);

        room.leave(UserId(1));
        assert!(room.ready.is_empty());
    }
}

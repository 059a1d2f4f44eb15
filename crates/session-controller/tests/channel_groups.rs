//! Channel-group integration tests.
//!
//! Presence updates go through the real reactor and scope actors; the chat
//! platform is a recording mock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use sc_test_utils::{
    custom_system, joined, left, moved, paired_system, single_room_system, MockPlatform,
    PlatformOp, TestChannels, AFK, ALICE, BOB, CAROL, GUILD, LOBBY, OTHER_GUILD, RACING_LOBBY,
};
use session_controller::channels::{GroupState, GroupSummary, NumberLedger, RoomLabel};
use session_controller::errors::ScError;
use session_controller::presence::PresenceOutcome;
use std::collections::BTreeSet;
use std::time::Duration;

fn voice_of(group: &GroupSummary, label: RoomLabel) -> common::ChannelId {
    group
        .rooms
        .iter()
        .find(|room| room.label == label)
        .map(|room| room.voice)
        .unwrap()
}

fn text_of(group: &GroupSummary, label: RoomLabel) -> common::ChannelId {
    group
        .rooms
        .iter()
        .find(|room| room.label == label)
        .map(|room| room.text)
        .unwrap()
}

/// Poll until `guild` has exactly `count` groups.
async fn wait_for_groups(channels: &TestChannels, count: usize) -> Vec<GroupSummary> {
    for _ in 0..100 {
        let groups = channels.groups(GUILD).await;
        if groups.len() == count {
            return groups;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("guild never reached {count} groups");
}

#[tokio::test]
async fn test_lobby_joins_allocate_smallest_free_number() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;

    assert_eq!(
        channels.apply(joined(GUILD, ALICE, LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 1 }]
    );
    assert_eq!(
        channels.apply(joined(GUILD, BOB, LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 2 }]
    );

    let platform = channels.platform();
    assert_eq!(
        platform.channel_names(GUILD),
        vec!["Game Room 1", "Game Room 2", "game-room-1", "game-room-2"]
    );
    assert!(platform.role_named("Game Room 1").is_some());
    assert_eq!(
        channels.ledger().list_active_numbers(GUILD).await.unwrap(),
        BTreeSet::from([1, 2])
    );

    let groups = channels.groups(GUILD).await;
    let room_one = voice_of(&groups[0], RoomLabel::Only);
    assert!(platform.moves().contains(&(ALICE, room_one)));
    assert_eq!(groups[0].rooms[0].occupants, vec![ALICE]);

    // The platform echoes the move out of the lobby.
    assert_eq!(
        channels.apply(moved(GUILD, ALICE, LOBBY, room_one)).await,
        vec![
            PresenceOutcome::Granted { number: 1 },
            PresenceOutcome::Ignored
        ]
    );

    assert_eq!(
        channels.apply(left(GUILD, ALICE, room_one)).await,
        vec![PresenceOutcome::TornDown { number: 1 }]
    );
    assert_eq!(
        platform.channel_names(GUILD),
        vec!["Game Room 2", "game-room-2"]
    );
    assert!(platform.role_named("Game Room 1").is_none());

    assert_eq!(
        channels.apply(joined(GUILD, CAROL, LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 1 }]
    );
    assert_eq!(channels.metrics().group_count(), 2);
}

#[tokio::test]
async fn test_single_room_access_follows_presence() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, LOBBY)).await;

    let group = channels.groups(GUILD).await.remove(0);
    let voice = voice_of(&group, RoomLabel::Only);
    let text = text_of(&group, RoomLabel::Only);
    let platform = channels.platform();

    assert!(platform.can_read(text, ALICE));
    assert!(!platform.can_read(text, BOB));
    assert!(platform.role(group_role(platform, "Game Room 1")).unwrap().mentionable);

    assert_eq!(
        channels.apply(joined(GUILD, BOB, voice)).await,
        vec![PresenceOutcome::Granted { number: 1 }]
    );
    assert!(platform.can_read(text, BOB));

    assert_eq!(
        channels.apply(left(GUILD, BOB, voice)).await,
        vec![PresenceOutcome::Revoked { number: 1 }]
    );
    assert!(!platform.can_read(text, BOB));
    assert!(platform.roles_of(BOB).is_empty());
    assert!(platform.can_read(text, ALICE));
}

fn group_role(platform: &MockPlatform, name: &str) -> common::RoleId {
    platform.role_named(name).unwrap()
}

#[tokio::test]
async fn test_paired_rooms_share_number_and_admin_role() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(paired_system(RACING_LOBBY)).await;

    assert_eq!(
        channels.apply(joined(GUILD, ALICE, RACING_LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 1 }]
    );

    let platform = channels.platform();
    assert_eq!(
        platform.channel_names(GUILD),
        vec![
            "Racing Channel 1A",
            "Racing Channel 1B",
            "racing-channel-1a",
            "racing-channel-1b"
        ]
    );
    assert_eq!(platform.role_count(), 1);
    let admin = group_role(platform, "Racing Channel 1 Admin");
    assert!(!platform.role(admin).unwrap().mentionable);
    assert!(platform.roles_of(ALICE).contains(&admin));

    let group = channels.groups(GUILD).await.remove(0);
    let (voice_a, text_a) = (voice_of(&group, RoomLabel::A), text_of(&group, RoomLabel::A));
    let (voice_b, text_b) = (voice_of(&group, RoomLabel::B), text_of(&group, RoomLabel::B));

    // Admin reads both rooms.
    assert!(platform.can_read(text_a, ALICE));
    assert!(platform.can_read(text_b, ALICE));

    channels.apply(joined(GUILD, BOB, voice_a)).await;
    assert!(platform.can_read(text_a, BOB));
    assert!(!platform.can_read(text_b, BOB));

    channels.apply(joined(GUILD, CAROL, voice_b)).await;
    assert!(platform.can_read(text_b, CAROL));
    assert!(!platform.can_read(text_a, CAROL));

    // Room A empties while B is occupied: group survives.
    assert_eq!(
        channels.apply(left(GUILD, ALICE, voice_a)).await,
        vec![PresenceOutcome::Revoked { number: 1 }]
    );
    assert_eq!(
        channels.apply(left(GUILD, BOB, voice_a)).await,
        vec![PresenceOutcome::Revoked { number: 1 }]
    );
    assert_eq!(platform.channel_count(), 4);

    assert_eq!(
        channels.apply(left(GUILD, CAROL, voice_b)).await,
        vec![PresenceOutcome::TornDown { number: 1 }]
    );
    assert!(platform.is_clean());
    assert!(channels
        .ledger()
        .list_active_numbers(GUILD)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sole_member_moving_between_rooms_keeps_group() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(paired_system(RACING_LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, RACING_LOBBY)).await;

    let group = channels.groups(GUILD).await.remove(0);
    let (voice_a, voice_b) = (voice_of(&group, RoomLabel::A), voice_of(&group, RoomLabel::B));

    assert_eq!(
        channels.apply(moved(GUILD, ALICE, voice_a, voice_b)).await,
        vec![
            PresenceOutcome::Granted { number: 1 },
            PresenceOutcome::Revoked { number: 1 }
        ]
    );

    let groups = channels.groups(GUILD).await;
    assert_eq!(groups.len(), 1);
    let rooms = &groups[0].rooms;
    assert!(rooms.iter().find(|r| r.label == RoomLabel::A).unwrap().occupants.is_empty());
    assert_eq!(
        rooms.iter().find(|r| r.label == RoomLabel::B).unwrap().occupants,
        vec![ALICE]
    );
    assert_eq!(channels.platform().channel_count(), 4);

    // Moving on to another group tears this one down.
    channels.register(single_room_system(LOBBY)).await;
    assert_eq!(
        channels.apply(moved(GUILD, ALICE, voice_b, LOBBY)).await,
        vec![
            PresenceOutcome::Provisioned { number: 2 },
            PresenceOutcome::TornDown { number: 1 }
        ]
    );
    assert_eq!(
        channels.platform().channel_names(GUILD),
        vec!["Game Room 2", "game-room-2"]
    );
}

#[tokio::test]
async fn test_failed_provisioning_rolls_back() {
    // Voice channel succeeds, text channel fails.
    let platform = MockPlatform::new().with_failure_after(PlatformOp::CreateChannel, 1);
    let channels = TestChannels::with_platform(platform.clone(), Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;

    let result = channels
        .reactor()
        .apply_update(joined(GUILD, ALICE, LOBBY))
        .await;

    assert!(matches!(result, Err(ScError::ProvisioningFailed(_))));
    assert!(platform.is_clean());
    assert_eq!(platform.call_count(PlatformOp::DeleteChannel), 1);
    assert_eq!(platform.call_count(PlatformOp::DeleteRole), 1);
    assert!(channels
        .ledger()
        .list_active_numbers(GUILD)
        .await
        .unwrap()
        .is_empty());
    assert!(channels.groups(GUILD).await.is_empty());

    platform.clear_failures();
    assert_eq!(
        channels.apply(joined(GUILD, ALICE, LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 1 }]
    );
}

#[tokio::test]
async fn test_failed_move_rolls_back_channels_and_role() {
    let platform = MockPlatform::new().with_failure(PlatformOp::MoveMember);
    let channels = TestChannels::with_platform(platform.clone(), Duration::ZERO);
    channels.register(paired_system(RACING_LOBBY)).await;

    let result = channels
        .reactor()
        .apply_update(joined(GUILD, ALICE, RACING_LOBBY))
        .await;

    assert!(matches!(result, Err(ScError::ProvisioningFailed(_))));
    assert!(platform.is_clean());
    assert_eq!(platform.call_count(PlatformOp::DeleteChannel), 4);
    assert_eq!(channels.metrics().group_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_debounced_teardown_and_abort() {
    let channels = TestChannels::new(Duration::from_secs(30));
    channels.register(single_room_system(LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, LOBBY)).await;
    let voice = voice_of(&channels.groups(GUILD).await[0], RoomLabel::Only);

    assert_eq!(
        channels.apply(left(GUILD, ALICE, voice)).await,
        vec![PresenceOutcome::Draining { number: 1 }]
    );
    assert_eq!(channels.groups(GUILD).await[0].state, GroupState::Draining);

    // A draining number is still taken.
    assert_eq!(
        channels.apply(joined(GUILD, BOB, LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 2 }]
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        channels.apply(joined(GUILD, ALICE, voice)).await,
        vec![PresenceOutcome::TeardownAborted { number: 1 }]
    );
    assert_eq!(channels.groups(GUILD).await[0].state, GroupState::Active);

    // The aborted deadline must not fire later.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(channels.groups(GUILD).await.len(), 2);

    channels.apply(left(GUILD, ALICE, voice)).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    let groups = wait_for_groups(&channels, 1).await;
    assert_eq!(groups[0].number, 2);
    assert_eq!(
        channels.platform().channel_names(GUILD),
        vec!["Game Room 2", "game-room-2"]
    );
    assert_eq!(
        channels.ledger().list_active_numbers(GUILD).await.unwrap(),
        BTreeSet::from([2])
    );
}

#[tokio::test]
async fn test_ready_check() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, LOBBY)).await;
    let group = channels.groups(GUILD).await.remove(0);
    let voice = voice_of(&group, RoomLabel::Only);
    let text = text_of(&group, RoomLabel::Only);
    channels.apply(joined(GUILD, BOB, voice)).await;

    let reactor = channels.reactor();
    let report = reactor.set_ready(GUILD, text, ALICE, true).await.unwrap();
    assert_eq!(report.ready, vec![ALICE]);
    assert_eq!(report.not_ready, vec![BOB]);
    assert!(!report.all_ready);

    let report = reactor.set_ready(GUILD, text, BOB, true).await.unwrap();
    assert!(report.all_ready);

    assert!(matches!(
        reactor.set_ready(GUILD, text, CAROL, true).await,
        Err(ScError::NotInGroup)
    ));
    assert!(matches!(
        reactor.ready_check(GUILD, LOBBY).await,
        Err(ScError::NotInGroup)
    ));

    let report = reactor.set_ready(GUILD, text, BOB, false).await.unwrap();
    assert_eq!(report.not_ready, vec![BOB]);

    channels.apply(left(GUILD, BOB, voice)).await;
    let report = reactor.ready_check(GUILD, text).await.unwrap();
    assert_eq!(report.ready, vec![ALICE]);
    assert!(report.not_ready.is_empty());
    assert!(report.all_ready);
}

#[tokio::test]
async fn test_lock_and_unlock() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(paired_system(RACING_LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, RACING_LOBBY)).await;
    let group = channels.groups(GUILD).await.remove(0);
    let text_a = text_of(&group, RoomLabel::A);
    let voices = [voice_of(&group, RoomLabel::A), voice_of(&group, RoomLabel::B)];

    let reactor = channels.reactor();
    assert!(matches!(
        reactor.set_locked(GUILD, text_a, CAROL, true).await,
        Err(ScError::NotInGroup)
    ));

    reactor.set_locked(GUILD, text_a, ALICE, true).await.unwrap();
    assert!(voices.iter().all(|v| channels.platform().is_locked(*v)));
    assert!(channels.groups(GUILD).await[0].rooms.iter().all(|r| r.locked));

    // Members already inside are unaffected.
    assert_eq!(
        channels.apply(joined(GUILD, BOB, voices[1])).await,
        vec![PresenceOutcome::Granted { number: 1 }]
    );

    reactor.set_locked(GUILD, voices[1], BOB, false).await.unwrap();
    assert!(voices.iter().all(|v| !channels.platform().is_locked(*v)));
}

#[tokio::test]
async fn test_remove_room_system_tears_down_its_groups() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    channels.register(paired_system(RACING_LOBBY)).await;

    channels.apply(joined(GUILD, ALICE, LOBBY)).await;
    channels.apply(joined(GUILD, BOB, LOBBY)).await;
    assert_eq!(
        channels.apply(joined(GUILD, CAROL, RACING_LOBBY)).await,
        vec![PresenceOutcome::Provisioned { number: 3 }]
    );

    let removed = channels
        .reactor()
        .remove_room_system(GUILD, LOBBY)
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let groups = channels.groups(GUILD).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].number, 3);
    assert_eq!(channels.platform().channel_count(), 4);

    // The lobby is an ordinary channel again.
    assert_eq!(
        channels.apply(joined(GUILD, ALICE, LOBBY)).await,
        vec![PresenceOutcome::Ignored]
    );
    assert!(matches!(
        channels.reactor().remove_room_system(GUILD, LOBBY).await,
        Err(ScError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_room_system_registration_rules() {
    let channels = TestChannels::new(Duration::ZERO);
    channels
        .register(custom_system(LOBBY, "Lounge", "lounge"))
        .await;

    assert!(matches!(
        channels
            .reactor()
            .register_room_system(GUILD, single_room_system(LOBBY))
            .await,
        Err(ScError::InvalidRequest(_))
    ));

    channels.apply(joined(GUILD, ALICE, LOBBY)).await;
    assert_eq!(
        channels.platform().channel_names(GUILD),
        vec!["Lounge 1", "lounge-1"]
    );
    assert_eq!(
        channels.apply(joined(GUILD, BOB, AFK)).await,
        vec![PresenceOutcome::Ignored]
    );
}

#[tokio::test]
async fn test_guilds_number_independently() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    let other_lobby = common::ChannelId(2_001);
    channels
        .reactor()
        .register_room_system(OTHER_GUILD, single_room_system(other_lobby))
        .await
        .unwrap();

    channels.apply(joined(GUILD, ALICE, LOBBY)).await;
    assert_eq!(
        channels.apply(joined(OTHER_GUILD, BOB, other_lobby)).await,
        vec![PresenceOutcome::Provisioned { number: 1 }]
    );
    assert_eq!(
        channels.platform().channel_names(OTHER_GUILD),
        vec!["Game Room 1", "game-room-1"]
    );
}

#[tokio::test]
async fn test_dispatch_preserves_per_guild_order() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    let reactor = channels.reactor();

    reactor.dispatch(joined(GUILD, ALICE, LOBBY)).await.unwrap();
    reactor.dispatch(joined(GUILD, BOB, LOBBY)).await.unwrap();
    reactor.dispatch(joined(GUILD, CAROL, LOBBY)).await.unwrap();

    // Queued behind the three joins.
    let numbers: Vec<u32> = channels
        .groups(GUILD)
        .await
        .iter()
        .map(|group| group.number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_shutdown_rejects_new_events() {
    let channels = TestChannels::new(Duration::ZERO);
    channels.register(single_room_system(LOBBY)).await;
    channels.apply(joined(GUILD, ALICE, LOBBY)).await;

    channels.reactor().shutdown().await;

    assert!(matches!(
        channels.reactor().apply_update(joined(GUILD, BOB, LOBBY)).await,
        Err(ScError::ShuttingDown)
    ));
    // Groups stay on the platform.
    assert_eq!(channels.platform().channel_count(), 2);
}

//! Signaling scenarios driven through the relay without a transport.
//!
//! Each test plays a sequence of client messages against a fresh relay and
//! checks who hears what, in which order, and what the registry looks like
//! afterwards.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use relay_service::errors::LOCKED_MESSAGE;
use relay_service::relay::{HostDisconnectPolicy, RelaySettings};
use relay_test_utils::*;
use signaling_protocol::{ClientMessage, ServerMessage};

const ROOM: &str = "room-1";

/// Host `h` plus guests `a` and `b`, inboxes drained.
fn three_party(harness: &mut RelayHarness) {
    harness.send("h", join_as_host(ROOM, "Hana"));
    harness.send("a", join_meeting(ROOM, "Abe"));
    harness.send("b", join_meeting(ROOM, "Bea"));
    harness.clear();
}

#[test]
fn test_join_announces_new_participant_to_room() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host_named(ROOM, "Hana", "Standup"));
    assert_eq!(harness.events("h"), vec!["joined-meeting"]);

    harness.send("a", join_meeting(" ROOM-1 ", "Abe"));

    let mut inbox = harness.take("a").into_iter();
    match inbox.next() {
        Some(ServerMessage::JoinedMeeting(snapshot)) => {
            assert_eq!(snapshot.meeting_name, "Standup");
            assert!(!snapshot.is_host);
            assert_eq!(snapshot.participants.len(), 2);
        }
        other => panic!("expected joined-meeting, got {other:?}"),
    }
    assert!(inbox.next().is_none());
    assert_eq!(harness.events("h"), vec!["participant-joined"]);
}

#[test]
fn test_rejoin_is_not_announced_twice() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));
    harness.send("a", join_meeting(ROOM, "Abe"));
    harness.clear();

    harness.send("a", join_meeting(ROOM, "Abe"));

    assert_eq!(harness.events("a"), vec!["joined-meeting"]);
    assert!(harness.events("h").is_empty());
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.participant_count(), 2);
}

#[test]
fn test_host_leave_promotes_co_host() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);
    harness.send("h", make_cohost("b"));
    harness.clear();

    harness.send("h", host_leave(ROOM));

    assert_eq!(harness.events("a"), vec!["host-left", "participant-left"]);
    assert_eq!(
        harness.events("b"),
        vec!["host-left", "made-host", "participant-left"]
    );
    assert!(harness.events("h").is_empty());

    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.host_id(), Some(&conn("b")));
    let b = meeting.participant(&conn("b")).unwrap();
    assert!(b.is_host);
    assert!(!b.is_co_host);
    assert_eq!(meeting.participants().iter().filter(|p| p.is_host).count(), 1);
}

#[test]
fn test_host_leave_without_co_host_promotes_earliest_joiner() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("h", host_leave(ROOM));

    match harness.take("a").into_iter().next() {
        Some(ServerMessage::HostLeft(left)) => {
            assert_eq!(left.old_host_name, "Hana");
            assert_eq!(left.new_host.participant_id, conn("a"));
        }
        other => panic!("expected host-left, got {other:?}"),
    }
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.host_id(), Some(&conn("a")));
}

#[test]
fn test_spotlighted_participant_keeps_spotlight_after_becoming_host() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host("M1", "Hana"));
    harness.send("p1", join_meeting("M1", "Pia"));
    harness.send("h", spotlight("p1"));
    assert!(harness.events("p1").contains(&"participant-spotlighted"));

    harness.send("h", host_leave("M1"));

    let meeting = harness.relay().registry().meeting(&meeting_id("M1")).unwrap();
    assert_eq!(meeting.participant_count(), 1);
    assert_eq!(meeting.host_id(), Some(&conn("p1")));
    assert_eq!(meeting.spotlighted(), Some(&conn("p1")));
}

#[test]
fn test_last_host_leave_deletes_meeting() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));

    harness.send("h", host_leave(ROOM));

    assert_eq!(harness.relay().registry().meeting_count(), 0);
    assert!(harness.relay().registry().membership(&conn("h")).is_none());
}

#[test]
fn test_locked_meeting_rejects_newcomers() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));
    harness.send("h", lock(true));
    assert_eq!(harness.events("h"), vec!["joined-meeting", "meeting-lock-changed"]);

    harness.send("x", join_meeting(ROOM, "Xavi"));

    match harness.take("x").as_slice() {
        [ServerMessage::MeetingLocked(locked)] => {
            assert_eq!(locked.message, LOCKED_MESSAGE);
            assert_eq!(locked.meeting_id, meeting_id(ROOM));
        }
        other => panic!("expected meeting-locked, got {other:?}"),
    }
    assert!(harness.events("h").is_empty());
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.participant_count(), 1);
}

#[test]
fn test_join_unknown_meeting_uses_meeting_error() {
    let mut harness = RelayHarness::new();

    harness.send("a", join_meeting("nowhere", "Abe"));

    assert_eq!(harness.events("a"), vec!["meeting-error"]);
}

#[test]
fn test_malformed_join_frame_uses_meeting_error() {
    let mut harness = RelayHarness::new();

    harness.send_frame("a", r#"{"event":"join-meeting","data":{}}"#);

    assert_eq!(harness.events("a"), vec!["meeting-error"]);
    assert_eq!(harness.relay().registry().meeting_count(), 0);
}

#[test]
fn test_guest_cannot_use_host_controls() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("a", lock(true));
    harness.send("a", rename("Hijacked"));
    harness.send("a", end_for_all(ROOM));

    assert_eq!(
        harness.events("a"),
        vec!["action-error", "action-error", "action-error"]
    );
    assert!(harness.events("h").is_empty());
    assert!(harness.events("b").is_empty());
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert!(!meeting.is_locked());
    assert_ne!(meeting.name(), "Hijacked");
}

#[test]
fn test_ready_participants_are_paired_once() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("h", ClientMessage::ParticipantReady);
    assert!(harness.events("h").is_empty());

    harness.send("a", ClientMessage::ParticipantReady);

    match harness.take("a").as_slice() {
        [ServerMessage::InitiateConnection(init)] => {
            assert_eq!(init.target_id, conn("h"));
            assert!(init.should_create_offer);
        }
        other => panic!("expected one initiate-connection, got {other:?}"),
    }
    match harness.take("h").as_slice() {
        [ServerMessage::InitiateConnection(init)] => {
            assert_eq!(init.target_id, conn("a"));
            assert!(!init.should_create_offer);
        }
        other => panic!("expected one initiate-connection, got {other:?}"),
    }
    assert!(harness.events("b").is_empty());
}

#[test]
fn test_negotiation_messages_reach_only_their_target_in_order() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("a", offer("h", "v=0 offer"));
    harness.send("a", candidate("h", "candidate:1"));
    harness.send("a", candidate("h", "candidate:2"));
    harness.send("h", answer("a", "v=0 answer"));

    let to_host = harness.take("h");
    assert_eq!(
        to_host.iter().map(ServerMessage::event_name).collect::<Vec<_>>(),
        vec!["offer", "ice-candidate", "ice-candidate"]
    );
    match to_host.first() {
        Some(ServerMessage::Offer(offer)) => {
            assert_eq!(offer.sender, conn("a"));
            assert_eq!(offer.sdp, "v=0 offer");
        }
        other => panic!("expected offer, got {other:?}"),
    }
    let lines: Vec<_> = to_host
        .iter()
        .filter_map(|m| match m {
            ServerMessage::IceCandidate(c) => Some(c.candidate.candidate.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec!["candidate:1", "candidate:2"]);

    match harness.take("a").as_slice() {
        [ServerMessage::Answer(answer)] => assert_eq!(answer.sender, conn("h")),
        other => panic!("expected answer, got {other:?}"),
    }
    assert!(harness.events("b").is_empty());
}

#[test]
fn test_signal_to_stranger_is_rejected() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);
    harness.send("z", join_as_host("elsewhere", "Zed"));
    harness.clear();

    harness.send("a", offer("z", "v=0"));

    assert_eq!(harness.events("a"), vec!["action-error"]);
    assert!(harness.events("z").is_empty());
}

#[test]
fn test_restart_request_is_forwarded() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("a", restart("b"));

    match harness.take("b").as_slice() {
        [ServerMessage::RestartConnection(req)] => assert_eq!(req.sender, conn("a")),
        other => panic!("expected restart-connection, got {other:?}"),
    }
}

#[test]
fn test_kick_removes_target_and_notifies_room() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("h", kick("a"));

    assert_eq!(harness.events("a"), vec!["kicked-from-meeting"]);
    assert_eq!(harness.events("b"), vec!["participant-kicked"]);
    assert_eq!(harness.events("h"), vec!["participant-kicked"]);
    assert!(harness.relay().registry().membership(&conn("a")).is_none());

    harness.send("a", join_meeting("other", "Abe"));
    assert_eq!(harness.events("a"), vec!["meeting-error"]);
}

#[test]
fn test_co_host_mute_forces_target() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);
    harness.send("h", make_cohost("a"));
    assert!(harness.events("a").contains(&"made-cohost"));
    harness.clear();

    harness.send("a", mute("b", true));

    assert_eq!(harness.events("b"), vec!["participant-muted", "force-mute"]);
    assert_eq!(harness.events("h"), vec!["participant-muted"]);
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert!(meeting.participant(&conn("b")).unwrap().is_muted);
}

#[test]
fn test_co_host_cannot_mute_host() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);
    harness.send("h", make_cohost("a"));
    harness.clear();

    harness.send("a", mute("h", true));

    assert_eq!(harness.events("a"), vec!["action-error"]);
    assert!(harness.events("h").is_empty());
}

#[test]
fn test_end_for_all_notifies_everyone_and_frees_members() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.send("h", end_for_all(ROOM));

    for who in ["h", "a", "b"] {
        assert_eq!(harness.events(who), vec!["meeting-ended"]);
    }
    assert_eq!(harness.relay().registry().meeting_count(), 0);

    harness.send("a", join_as_host("next", "Abe"));
    assert_eq!(harness.events("a"), vec!["joined-meeting"]);
}

#[test]
fn test_host_disconnect_transfers_by_default() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));
    harness.send("a", join_meeting(ROOM, "Abe"));
    harness.clear();

    harness.disconnect("h");

    assert_eq!(
        harness.events("a"),
        vec!["peer-disconnected", "host-left", "made-host", "participant-left"]
    );
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.host_id(), Some(&conn("a")));
}

#[test]
fn test_host_disconnect_ends_meeting_under_end_policy() {
    let mut harness = RelayHarness::with_settings(RelaySettings {
        host_disconnect_policy: HostDisconnectPolicy::EndMeeting,
        ..RelaySettings::default()
    });
    three_party(&mut harness);

    harness.disconnect("h");

    for who in ["a", "b"] {
        assert_eq!(harness.events(who), vec!["peer-disconnected", "meeting-ended"]);
    }
    assert_eq!(harness.relay().registry().meeting_count(), 0);
    assert!(harness.relay().registry().membership(&conn("a")).is_none());
}

#[test]
fn test_guest_disconnect_is_announced() {
    let mut harness = RelayHarness::new();
    three_party(&mut harness);

    harness.disconnect("b");
    harness.disconnect("b");

    assert_eq!(harness.events("h"), vec!["peer-disconnected", "participant-left"]);
    assert_eq!(harness.events("a"), vec!["peer-disconnected", "participant-left"]);
}

#[test]
fn test_health_sweep_probes_only_silent_participants() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));
    harness.send("a", join_meeting(ROOM, "Abe"));
    harness.clear();

    harness.advance(Duration::from_secs(30));
    harness.send("a", ClientMessage::Heartbeat);
    harness.advance(Duration::from_secs(31));
    harness.sweep();

    assert_eq!(harness.events("h"), vec!["connection-health-check"]);
    assert!(harness.events("a").is_empty());
    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.participant_count(), 2);
}

#[test]
fn test_single_host_holds_through_churn() {
    let mut harness = RelayHarness::new();
    harness.send("h", join_as_host(ROOM, "Hana"));
    for guest in ["g1", "g2", "g3", "g4"] {
        harness.send(guest, join_meeting(ROOM, guest));
    }
    harness.send("h", make_cohost("g3"));
    harness.disconnect("h");
    harness.send("g1", ClientMessage::LeaveMeeting);
    harness.send("g5", join_meeting(ROOM, "g5"));
    harness.disconnect("g3");

    let meeting = harness.relay().registry().meeting(&meeting_id(ROOM)).unwrap();
    assert_eq!(meeting.participants().iter().filter(|p| p.is_host).count(), 1);
    assert_eq!(meeting.host_id(), Some(&conn("g2")));
}

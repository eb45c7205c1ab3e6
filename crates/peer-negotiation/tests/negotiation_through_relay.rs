//! Negotiation engines talking to each other through a real relay.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use peer_negotiation::{
    Command, EngineEvent, LinkPhase, NegotiationConfig, SignalingState, TrackSlot,
};
use relay_service::relay::RelaySettings;
use relay_test_utils::{conn, end_for_all, MeetingPipe};
use signaling_protocol::{IceCandidate, ServerMessage, TransportState};

const ROOM: &str = "ROOM-7";

fn assert_settled(pipe: &MeetingPipe, a: &str, b: &str) {
    for (local, remote) in [(a, b), (b, a)] {
        let link = pipe
            .engine(local)
            .link(&conn(remote))
            .unwrap_or_else(|| panic!("{local} has no link to {remote}"));
        assert_eq!(link.signaling_state(), SignalingState::Stable, "{local}->{remote}");
        assert!(!link.making_offer(), "{local}->{remote}");
        assert!(link.pending_candidates().is_empty(), "{local}->{remote}");
    }
}

#[test]
fn test_three_participants_form_full_mesh() {
    let mut pipe = MeetingPipe::new();

    pipe.host("h", ROOM);
    pipe.join("g1", ROOM);
    pipe.join("g2", ROOM);

    for id in ["h", "g1", "g2"] {
        assert_eq!(pipe.engine(id).link_count(), 2, "{id}");
    }
    assert_settled(&pipe, "h", "g1");
    assert_settled(&pipe, "h", "g2");
    assert_settled(&pipe, "g1", "g2");

    pipe.connect_all();
    pipe.pump();
    for id in ["h", "g1", "g2"] {
        assert!(pipe
            .engine(id)
            .links()
            .all(|link| link.phase() == LinkPhase::Connected));
    }
}

#[test]
fn test_newcomer_offers_to_existing_participants() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.take_commands("h");

    pipe.join("g", ROOM);

    assert_eq!(pipe.engine("g").link(&conn("h")).unwrap().offers_sent(), 1);
    assert_eq!(pipe.engine("h").link(&conn("g")).unwrap().offers_sent(), 0);
    let host_commands = pipe.take_commands("h");
    assert!(host_commands
        .iter()
        .any(|c| matches!(c, Command::CreateAnswer { .. })));
    let host_tracks = host_commands
        .iter()
        .filter(|c| matches!(c, Command::AddTrack { .. }))
        .count();
    assert_eq!(host_tracks, 2);
}

#[test]
fn test_crossing_offers_resolve_to_one_winner() {
    let mut pipe = MeetingPipe::new();
    pipe.host("alpha", ROOM);
    pipe.join("bravo", ROOM);

    // Both ends decide to renegotiate before either offer is delivered.
    pipe.with_engine("alpha", |e| e.negotiation_needed(&conn("bravo")).unwrap());
    pipe.with_engine("bravo", |e| e.negotiation_needed(&conn("alpha")).unwrap());
    pipe.pump();

    assert_settled(&pipe, "alpha", "bravo");
    let polite = pipe.engine("alpha").link(&conn("bravo")).unwrap();
    let impolite = pipe.engine("bravo").link(&conn("alpha")).unwrap();
    assert!(polite.role().is_polite());
    assert_eq!(polite.ignored_offers(), 0);
    assert_eq!(impolite.ignored_offers(), 1);
    assert!(pipe
        .take_commands("alpha")
        .iter()
        .any(|c| matches!(c, Command::Rollback { .. })));
    assert!(!pipe
        .take_commands("bravo")
        .iter()
        .any(|c| matches!(c, Command::Rollback { .. })));
}

#[test]
fn test_candidates_cross_the_relay() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g", ROOM);
    pipe.take_commands("g");

    pipe.with_engine("h", |e| {
        let generation = e.link(&conn("g")).unwrap().generation();
        e.local_candidate(
            &conn("g"),
            generation,
            IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            },
        );
    });
    pipe.pump();

    let added: Vec<String> = pipe
        .take_commands("g")
        .into_iter()
        .filter_map(|c| match c {
            Command::AddCandidate { peer, candidate, .. } if peer == conn("h") => {
                Some(candidate.candidate)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        added,
        vec!["candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string()]
    );
}

#[test]
fn test_screen_share_swaps_track_without_offer() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g1", ROOM);
    pipe.join("g2", ROOM);
    pipe.take_commands("h");
    pipe.take_received("g1");

    pipe.with_engine("h", |e| e.start_screen_capture(false));
    pipe.pump();

    let commands = pipe.take_commands("h");
    let replaced = commands
        .iter()
        .filter(|c| matches!(c, Command::ReplaceTrack { slot: TrackSlot::Video, .. }))
        .count();
    assert_eq!(replaced, 2);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::CreateOffer { .. })));
    assert!(pipe
        .received_events("g1")
        .contains(&"screen-share-started"));
    assert!(pipe.engine("h").media().is_screen_sharing());
}

#[test]
fn test_mute_reaches_the_room_as_signaling_only() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g", ROOM);
    pipe.take_commands("h");
    pipe.take_received("g");

    pipe.with_engine("h", |e| e.set_audio_enabled(false));
    pipe.pump();

    let received = pipe.take_received("g");
    assert!(received.iter().any(|m| matches!(
        m,
        ServerMessage::ParticipantAudioChanged(change)
            if change.participant_id == conn("h") && change.is_muted
    )));
    let commands = pipe.take_commands("h");
    assert!(commands
        .iter()
        .all(|c| matches!(c, Command::SetTrackEnabled { enabled: false, .. })));
}

#[test]
fn test_departed_peer_link_is_closed() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g1", ROOM);
    pipe.join("g2", ROOM);

    pipe.disconnect("g1");
    pipe.pump();

    assert_eq!(pipe.engine("h").link_count(), 1);
    assert_eq!(pipe.engine("g2").link_count(), 1);
    assert!(pipe.engine("h").link(&conn("g1")).is_none());
    assert!(pipe
        .take_events("g2")
        .contains(&EngineEvent::LinkClosed { peer: conn("g1") }));
}

#[test]
fn test_exhausted_restarts_rebuild_link_on_both_ends() {
    let config = NegotiationConfig {
        max_ice_restarts: 0,
        ..NegotiationConfig::default()
    };
    let mut pipe = MeetingPipe::with_settings(RelaySettings::default(), config);
    pipe.host("h", ROOM);
    pipe.join("g", ROOM);
    let host_before = pipe.engine("h").link(&conn("g")).unwrap().generation();
    let guest_before = pipe.engine("g").link(&conn("h")).unwrap().generation();

    pipe.transport("g", "h", TransportState::Failed);
    pipe.pump();

    assert!(pipe.received_events("h").contains(&"restart-connection"));
    assert!(pipe.engine("h").link(&conn("g")).unwrap().generation() > host_before);
    assert!(pipe.engine("g").link(&conn("h")).unwrap().generation() > guest_before);
    assert_eq!(pipe.engine("h").link_count(), 1);
    assert_eq!(pipe.engine("g").link_count(), 1);
    assert_settled(&pipe, "h", "g");
    // The side that received the request made the fresh offer.
    assert_eq!(pipe.engine("h").link(&conn("g")).unwrap().offers_sent(), 1);
}

#[test]
fn test_disconnect_grace_restarts_through_relay() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g", ROOM);
    pipe.connect_all();
    pipe.pump();

    pipe.transport("g", "h", TransportState::Disconnected);
    pipe.pump();
    pipe.advance(std::time::Duration::from_secs(3));
    pipe.poll_timers();
    pipe.pump();

    let offers: Vec<bool> = pipe
        .take_received("h")
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Offer(offer) => Some(offer.ice_restart),
            _ => None,
        })
        .collect();
    assert_eq!(offers.last(), Some(&true));
    assert_settled(&pipe, "h", "g");
    assert_eq!(pipe.engine("g").link(&conn("h")).unwrap().ice_restarts(), 1);
}

#[test]
fn test_meeting_end_tears_down_every_session() {
    let mut pipe = MeetingPipe::new();
    pipe.host("h", ROOM);
    pipe.join("g1", ROOM);
    pipe.join("g2", ROOM);

    pipe.client_send("h", end_for_all(ROOM));
    pipe.pump();

    for id in ["g1", "g2"] {
        assert_eq!(pipe.engine(id).link_count(), 0, "{id}");
        assert!(pipe
            .take_events(id)
            .iter()
            .any(|e| matches!(e, EngineEvent::SessionEnded { .. })));
        assert!(pipe
            .take_commands(id)
            .iter()
            .any(|c| matches!(c, Command::StopTrack(_))));
    }
}

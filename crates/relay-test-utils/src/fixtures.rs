//! Builders for client messages used across relay tests.
//!
//! Connection ids in tests are plain strings; these helpers take `&str`
//! everywhere so scenarios read like the wire traffic they model.

use common::types::{ConnectionId, MeetingId};
use signaling_protocol::messages::{
    ChangeMeetingName, EndMeeting, JoinAsHost, JoinMeeting, MeetingRef, MuteParticipant,
    OutboundCandidate, OutboundDescription, TargetParticipant, ToggleLock,
};
use signaling_protocol::{ClientMessage, IceCandidate};

/// Parse a meeting id, panicking on invalid input.
#[must_use]
pub fn meeting_id(raw: &str) -> MeetingId {
    MeetingId::parse(raw).expect("test meeting id must be valid")
}

#[must_use]
pub fn conn(id: &str) -> ConnectionId {
    ConnectionId::from(id)
}

#[must_use]
pub fn join_as_host(meeting: &str, host_name: &str) -> ClientMessage {
    ClientMessage::JoinAsHost(JoinAsHost {
        meeting_id: meeting_id(meeting),
        host_name: host_name.to_string(),
        meeting_name: None,
    })
}

/// Host join with an explicit meeting name.
#[must_use]
pub fn join_as_host_named(meeting: &str, host_name: &str, meeting_name: &str) -> ClientMessage {
    ClientMessage::JoinAsHost(JoinAsHost {
        meeting_id: meeting_id(meeting),
        host_name: host_name.to_string(),
        meeting_name: Some(meeting_name.to_string()),
    })
}

#[must_use]
pub fn join_meeting(meeting: &str, participant_name: &str) -> ClientMessage {
    ClientMessage::JoinMeeting(JoinMeeting {
        meeting_id: meeting_id(meeting),
        participant_name: participant_name.to_string(),
    })
}

#[must_use]
pub fn host_leave(meeting: &str) -> ClientMessage {
    ClientMessage::HostLeaveMeeting(MeetingRef {
        meeting_id: meeting_id(meeting),
    })
}

#[must_use]
pub fn end_for_all(meeting: &str) -> ClientMessage {
    ClientMessage::EndMeetingForAll(EndMeeting {
        meeting_id: meeting_id(meeting),
        reason: None,
    })
}

#[must_use]
pub fn lock(is_locked: bool) -> ClientMessage {
    ClientMessage::ToggleMeetingLock(ToggleLock { is_locked })
}

#[must_use]
pub fn rename(new_name: &str) -> ClientMessage {
    ClientMessage::ChangeMeetingName(ChangeMeetingName {
        new_name: new_name.to_string(),
    })
}

fn target(id: &str) -> TargetParticipant {
    TargetParticipant {
        target_id: conn(id),
    }
}

#[must_use]
pub fn spotlight(target_id: &str) -> ClientMessage {
    ClientMessage::SpotlightParticipant(target(target_id))
}

#[must_use]
pub fn make_cohost(target_id: &str) -> ClientMessage {
    ClientMessage::MakeCohost(target(target_id))
}

#[must_use]
pub fn kick(target_id: &str) -> ClientMessage {
    ClientMessage::KickParticipant(target(target_id))
}

#[must_use]
pub fn restart(target_id: &str) -> ClientMessage {
    ClientMessage::RestartConnection(target(target_id))
}

#[must_use]
pub fn mute(target_id: &str, muted: bool) -> ClientMessage {
    ClientMessage::MuteParticipant(MuteParticipant {
        target_id: conn(target_id),
        muted,
    })
}

#[must_use]
pub fn offer(to: &str, sdp: &str) -> ClientMessage {
    ClientMessage::Offer(OutboundDescription {
        target: conn(to),
        sdp: sdp.to_string(),
        ice_restart: false,
    })
}

#[must_use]
pub fn answer(to: &str, sdp: &str) -> ClientMessage {
    ClientMessage::Answer(OutboundDescription {
        target: conn(to),
        sdp: sdp.to_string(),
        ice_restart: false,
    })
}

#[must_use]
pub fn candidate(to: &str, line: &str) -> ClientMessage {
    ClientMessage::IceCandidate(OutboundCandidate {
        target: conn(to),
        candidate: IceCandidate {
            candidate: line.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        },
    })
}

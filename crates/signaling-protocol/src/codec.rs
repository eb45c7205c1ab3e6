//! JSON codec and payload validation for signaling frames.
//!
//! Client frames are decoded in three steps: the envelope, the typed
//! payload for the named event, then semantic checks (name lengths, empty
//! strings). A failure at any step yields a [`ValidationError`] that knows
//! which reply event the relay should answer with.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{
    ActionError, ClientMessage, JoinAsHost, JoinMeeting, MeetingError, ServerMessage,
};

/// Longest accepted meeting name, after trimming.
pub const MAX_MEETING_NAME_LEN: usize = 100;

/// Longest accepted display name, after trimming.
pub const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Longest accepted free-text reason.
pub const MAX_REASON_LEN: usize = 200;

/// Which reply event carries a rejection back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyChannel {
    /// `meeting-error`, used for join attempts.
    Meeting,
    /// `action-error`, used for everything else.
    Action,
}

impl ReplyChannel {
    fn for_event(event: &str) -> Self {
        match event {
            "join-as-host" | "join-meeting" => ReplyChannel::Meeting,
            _ => ReplyChannel::Action,
        }
    }
}

/// A malformed or semantically invalid client frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub event: Option<String>,
    pub channel: ReplyChannel,
    pub message: String,
}

impl ValidationError {
    fn new(event: &str, message: impl Into<String>) -> Self {
        Self {
            event: Some(event.to_string()),
            channel: ReplyChannel::for_event(event),
            message: message.into(),
        }
    }

    fn malformed(message: impl Into<String>) -> Self {
        Self {
            event: None,
            channel: ReplyChannel::Action,
            message: message.into(),
        }
    }

    /// The reply to send back to the offending connection.
    #[must_use]
    pub fn to_reply(&self) -> ServerMessage {
        match self.channel {
            ReplyChannel::Meeting => ServerMessage::MeetingError(MeetingError {
                message: self.message.clone(),
            }),
            ReplyChannel::Action => ServerMessage::ActionError(ActionError {
                message: self.message.clone(),
                event: self.event.clone(),
            }),
        }
    }
}

/// Errors from encoding, or from decoding server frames on the client side.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ValidationError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data)
        .map_err(|e| ValidationError::new(event, format!("Invalid {event} payload: {e}")))
}

/// Decode and validate one client frame.
///
/// # Errors
///
/// Returns [`ValidationError`] when the frame is not JSON, names an unknown
/// event, is missing required fields, or fails semantic checks.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ValidationError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| ValidationError::malformed(format!("Malformed message: {e}")))?;
    let event = envelope.event.as_str();
    let data = envelope.data;

    let message = match event {
        "join-as-host" => ClientMessage::JoinAsHost(payload(event, data)?),
        "join-meeting" => ClientMessage::JoinMeeting(payload(event, data)?),
        "leave-meeting" => ClientMessage::LeaveMeeting,
        "host-leave-meeting" => ClientMessage::HostLeaveMeeting(payload(event, data)?),
        "end-meeting-for-all" => ClientMessage::EndMeetingForAll(payload(event, data)?),
        "toggle-meeting-lock" => ClientMessage::ToggleMeetingLock(payload(event, data)?),
        "update-meeting-permissions" => {
            ClientMessage::UpdateMeetingPermissions(payload(event, data)?)
        }
        "change-meeting-name" => ClientMessage::ChangeMeetingName(payload(event, data)?),
        "spotlight-participant" => ClientMessage::SpotlightParticipant(payload(event, data)?),
        "remove-spotlight" => ClientMessage::RemoveSpotlight,
        "mute-participant" => ClientMessage::MuteParticipant(payload(event, data)?),
        "make-cohost" => ClientMessage::MakeCohost(payload(event, data)?),
        "kick-participant" => ClientMessage::KickParticipant(payload(event, data)?),
        "toggle-mic" => ClientMessage::ToggleMic(payload(event, data)?),
        "toggle-camera" => ClientMessage::ToggleCamera(payload(event, data)?),
        "start-screen-share" => ClientMessage::StartScreenShare(payload(event, data)?),
        "stop-screen-share" => ClientMessage::StopScreenShare,
        "raise-hand" => ClientMessage::RaiseHand,
        "lower-hand" => ClientMessage::LowerHand,
        "participant-ready" => ClientMessage::ParticipantReady,
        "connection-state-change" => ClientMessage::ConnectionStateChange(payload(event, data)?),
        "restart-connection" => ClientMessage::RestartConnection(payload(event, data)?),
        "network-quality" => ClientMessage::NetworkQuality(payload(event, data)?),
        "heartbeat" => ClientMessage::Heartbeat,
        "offer" => ClientMessage::Offer(payload(event, data)?),
        "answer" => ClientMessage::Answer(payload(event, data)?),
        "ice-candidate" => ClientMessage::IceCandidate(payload(event, data)?),
        other => {
            return Err(ValidationError::new(
                other,
                format!("Unknown event: {other}"),
            ))
        }
    };

    validate(&message)?;
    Ok(message)
}

fn check_display_name(event: &str, field: &str, value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(event, format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::new(
            event,
            format!("{field} must be at most {MAX_DISPLAY_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Semantic checks that serde cannot express.
///
/// # Errors
///
/// Returns [`ValidationError`] describing the first failed check.
pub fn validate(message: &ClientMessage) -> Result<(), ValidationError> {
    let event = message.event_name();
    match message {
        ClientMessage::JoinAsHost(JoinAsHost {
            host_name,
            meeting_name,
            ..
        }) => {
            check_display_name(event, "Host name", host_name)?;
            if let Some(name) = meeting_name {
                if name.trim().chars().count() > MAX_MEETING_NAME_LEN {
                    return Err(ValidationError::new(event, "Invalid meeting name"));
                }
            }
        }
        ClientMessage::JoinMeeting(JoinMeeting {
            participant_name, ..
        }) => {
            check_display_name(event, "Participant name", participant_name)?;
        }
        ClientMessage::ChangeMeetingName(p) => {
            let len = p.new_name.trim().chars().count();
            if len == 0 || len > MAX_MEETING_NAME_LEN {
                return Err(ValidationError::new(event, "Invalid meeting name"));
            }
        }
        ClientMessage::UpdateMeetingPermissions(p) => {
            if p.permissions.is_empty() {
                return Err(ValidationError::new(event, "No permissions provided"));
            }
        }
        ClientMessage::EndMeetingForAll(p) => {
            if p
                .reason
                .as_ref()
                .is_some_and(|r| r.chars().count() > MAX_REASON_LEN)
            {
                return Err(ValidationError::new(event, "Reason is too long"));
            }
        }
        ClientMessage::NetworkQuality(p) => {
            if !p.score.is_finite() || p.score < 0.0 {
                return Err(ValidationError::new(event, "Invalid network quality score"));
            }
        }
        ClientMessage::Offer(d) | ClientMessage::Answer(d) => {
            if d.sdp.trim().is_empty() {
                return Err(ValidationError::new(event, "Session description is empty"));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Encode a relay message as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_server_message(message: &ServerMessage) -> Result<String, ProtocolError> {
    encode(message)
}

/// Encode a client message as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_client_message(message: &ClientMessage) -> Result<String, ProtocolError> {
    encode(message)
}

fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a relay frame on the client side.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidFrame`] for anything that does not parse
/// as a known server event.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: &Value) -> String {
        value.to_string()
    }

    #[test]
    fn test_decode_join_as_host_normalizes_meeting_id() {
        let msg = decode_client_message(&frame(&json!({
            "event": "join-as-host",
            "data": { "meetingId": " standup ", "hostName": "Alice" }
        })))
        .unwrap();

        match msg {
            ClientMessage::JoinAsHost(p) => {
                assert_eq!(p.meeting_id.as_str(), "STANDUP");
                assert_eq!(p.host_name, "Alice");
                assert!(p.meeting_name.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_join_failures_use_meeting_channel() {
        let err = decode_client_message(&frame(&json!({
            "event": "join-meeting",
            "data": { "meetingId": "M1" }
        })))
        .unwrap_err();

        assert_eq!(err.channel, ReplyChannel::Meeting);
        assert!(matches!(err.to_reply(), ServerMessage::MeetingError(_)));
    }

    #[test]
    fn test_blank_participant_name_is_rejected() {
        let err = decode_client_message(&frame(&json!({
            "event": "join-meeting",
            "data": { "meetingId": "M1", "participantName": "   " }
        })))
        .unwrap_err();

        assert_eq!(err.message, "Participant name is required");
    }

    #[test]
    fn test_action_failures_use_action_channel() {
        let err = decode_client_message(&frame(&json!({
            "event": "mute-participant",
            "data": {}
        })))
        .unwrap_err();

        assert_eq!(err.channel, ReplyChannel::Action);
        match err.to_reply() {
            ServerMessage::ActionError(e) => {
                assert_eq!(e.event.as_deref(), Some("mute-participant"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_meeting_name_bounds() {
        let too_long = "x".repeat(MAX_MEETING_NAME_LEN + 1);
        for name in ["", "   ", too_long.as_str()] {
            let err = decode_client_message(&frame(&json!({
                "event": "change-meeting-name",
                "data": { "newName": name }
            })))
            .unwrap_err();
            assert_eq!(err.message, "Invalid meeting name");
        }

        let exact = "x".repeat(MAX_MEETING_NAME_LEN);
        assert!(decode_client_message(&frame(&json!({
            "event": "change-meeting-name",
            "data": { "newName": exact }
        })))
        .is_ok());
    }

    #[test]
    fn test_payloadless_events_accept_missing_or_empty_data() {
        let a = decode_client_message(r#"{"event":"remove-spotlight"}"#).unwrap();
        let b = decode_client_message(r#"{"event":"remove-spotlight","data":{}}"#).unwrap();
        assert_eq!(a, ClientMessage::RemoveSpotlight);
        assert_eq!(b, ClientMessage::RemoveSpotlight);

        let share = decode_client_message(r#"{"event":"start-screen-share"}"#).unwrap();
        assert!(matches!(share, ClientMessage::StartScreenShare(_)));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = decode_client_message(r#"{"event":"self-destruct","data":{}}"#).unwrap_err();
        assert_eq!(err.message, "Unknown event: self-destruct");
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = decode_client_message("not json").unwrap_err();
        assert!(err.event.is_none());
        assert_eq!(err.channel, ReplyChannel::Action);
    }

    #[test]
    fn test_mute_defaults_to_muted() {
        let msg = decode_client_message(&frame(&json!({
            "event": "mute-participant",
            "data": { "targetId": "abc" }
        })))
        .unwrap();
        match msg {
            ClientMessage::MuteParticipant(p) => assert!(p.muted),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_empty_offer_is_rejected() {
        let err = decode_client_message(&frame(&json!({
            "event": "offer",
            "data": { "target": "abc", "sdp": "" }
        })))
        .unwrap_err();
        assert_eq!(err.message, "Session description is empty");
    }

    #[test]
    fn test_empty_permission_patch_is_rejected() {
        let err = decode_client_message(&frame(&json!({
            "event": "update-meeting-permissions",
            "data": { "permissions": {} }
        })))
        .unwrap_err();
        assert_eq!(err.message, "No permissions provided");
    }

    #[test]
    fn test_client_encoding_matches_decoder() {
        let msg = decode_client_message(&frame(&json!({
            "event": "ice-candidate",
            "data": {
                "target": "peer-b",
                "candidate": { "candidate": "candidate:0 1 udp 1 10.0.0.2 9 typ host", "sdpMid": "0" }
            }
        })))
        .unwrap();

        let encoded = encode_client_message(&msg).unwrap();
        assert_eq!(decode_client_message(&encoded).unwrap(), msg);
    }
}

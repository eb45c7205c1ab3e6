//! Client and server message enums and their payloads.

use common::types::{ConnectionId, MeetingId};
use serde::{Deserialize, Serialize};

use crate::model::{
    IceCandidate, LeaveReason, MeetingSnapshot, ParticipantView, Permissions, PermissionsPatch,
    TransportConfig, TransportState,
};

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Client -> relay payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAsHost {
    pub meeting_id: MeetingId,
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeeting {
    pub meeting_id: MeetingId,
    pub participant_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRef {
    pub meeting_id: MeetingId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMeeting {
    pub meeting_id: MeetingId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLock {
    pub is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermissions {
    pub permissions: PermissionsPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMeetingName {
    pub new_name: String,
}

/// Payload for events aimed at one other participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetParticipant {
    pub target_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteParticipant {
    pub target_id: ConnectionId,
    #[serde(default = "default_true")]
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMic {
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleCamera {
    pub is_camera_off: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScreenShare {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStateChange {
    pub target_id: ConnectionId,
    pub state: TransportState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkQuality {
    pub score: f64,
}

/// Outbound session description addressed to one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundDescription {
    pub target: ConnectionId,
    pub sdp: String,
    #[serde(default)]
    pub ice_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCandidate {
    pub target: ConnectionId,
    pub candidate: IceCandidate,
}

/// Everything a client may send to the relay.
///
/// Decoding goes through [`crate::codec::decode_client_message`], which
/// validates payloads; the derived `Serialize` is what clients encode with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinAsHost(JoinAsHost),
    JoinMeeting(JoinMeeting),
    LeaveMeeting,
    HostLeaveMeeting(MeetingRef),
    EndMeetingForAll(EndMeeting),
    ToggleMeetingLock(ToggleLock),
    UpdateMeetingPermissions(UpdatePermissions),
    ChangeMeetingName(ChangeMeetingName),
    SpotlightParticipant(TargetParticipant),
    RemoveSpotlight,
    MuteParticipant(MuteParticipant),
    MakeCohost(TargetParticipant),
    KickParticipant(TargetParticipant),
    ToggleMic(ToggleMic),
    ToggleCamera(ToggleCamera),
    StartScreenShare(StartScreenShare),
    StopScreenShare,
    RaiseHand,
    LowerHand,
    ParticipantReady,
    ConnectionStateChange(ConnectionStateChange),
    RestartConnection(TargetParticipant),
    NetworkQuality(NetworkQuality),
    Heartbeat,
    Offer(OutboundDescription),
    Answer(OutboundDescription),
    IceCandidate(OutboundCandidate),
}

impl ClientMessage {
    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinAsHost(_) => "join-as-host",
            ClientMessage::JoinMeeting(_) => "join-meeting",
            ClientMessage::LeaveMeeting => "leave-meeting",
            ClientMessage::HostLeaveMeeting(_) => "host-leave-meeting",
            ClientMessage::EndMeetingForAll(_) => "end-meeting-for-all",
            ClientMessage::ToggleMeetingLock(_) => "toggle-meeting-lock",
            ClientMessage::UpdateMeetingPermissions(_) => "update-meeting-permissions",
            ClientMessage::ChangeMeetingName(_) => "change-meeting-name",
            ClientMessage::SpotlightParticipant(_) => "spotlight-participant",
            ClientMessage::RemoveSpotlight => "remove-spotlight",
            ClientMessage::MuteParticipant(_) => "mute-participant",
            ClientMessage::MakeCohost(_) => "make-cohost",
            ClientMessage::KickParticipant(_) => "kick-participant",
            ClientMessage::ToggleMic(_) => "toggle-mic",
            ClientMessage::ToggleCamera(_) => "toggle-camera",
            ClientMessage::StartScreenShare(_) => "start-screen-share",
            ClientMessage::StopScreenShare => "stop-screen-share",
            ClientMessage::RaiseHand => "raise-hand",
            ClientMessage::LowerHand => "lower-hand",
            ClientMessage::ParticipantReady => "participant-ready",
            ClientMessage::ConnectionStateChange(_) => "connection-state-change",
            ClientMessage::RestartConnection(_) => "restart-connection",
            ClientMessage::NetworkQuality(_) => "network-quality",
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
        }
    }
}

// ---------------------------------------------------------------------------
// Relay -> client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantJoined {
    pub participant: ParticipantView,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantLeft {
    pub participant_id: ConnectionId,
    pub participant_name: String,
    pub reason: LeaveReason,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisconnected {
    pub participant_id: ConnectionId,
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingLockChanged {
    pub is_locked: bool,
    pub changed_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingPermissionsUpdated {
    pub permissions: Permissions,
    pub changed_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePermissionUpdated {
    pub allow_rename: bool,
    pub changed_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingNameChanged {
    pub old_name: String,
    pub new_name: String,
    pub changed_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSpotlighted {
    pub participant_id: ConnectionId,
    pub spotlighted_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotlightRemoved {
    pub removed_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMuted {
    pub participant_id: ConnectionId,
    pub muted: bool,
    pub muted_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceMute {
    pub muted: bool,
    pub muted_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohostAssigned {
    pub participant_id: ConnectionId,
    pub assigned_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MadeCohost {
    pub meeting_id: MeetingId,
    pub assigned_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantKicked {
    pub participant_id: ConnectionId,
    pub participant_name: String,
    pub kicked_by: String,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickedFromMeeting {
    pub meeting_id: MeetingId,
    pub kicked_by: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEnded {
    pub meeting_id: MeetingId,
    pub reason: String,
    pub host_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHost {
    pub participant_id: ConnectionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostLeft {
    pub old_host_name: String,
    pub new_host: NewHost,
    pub participants: Vec<ParticipantView>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MadeHost {
    pub meeting_id: MeetingId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingLocked {
    pub meeting_id: MeetingId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAudioChanged {
    pub participant_id: ConnectionId,
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantVideoChanged {
    pub participant_id: ConnectionId,
    pub is_camera_off: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenShareStarted {
    pub participant_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

/// Payload that only names a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub participant_id: ConnectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateConnection {
    pub target_id: ConnectionId,
    pub should_create_offer: bool,
    pub transport_config: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    pub sender: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Relay wall clock in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Session description relayed from `sender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundDescription {
    pub sender: ConnectionId,
    pub sdp: String,
    #[serde(default)]
    pub ice_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCandidate {
    pub sender: ConnectionId,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingError {
    pub message: String,
}

/// Everything the relay may send to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    Connected(Connected),
    JoinedMeeting(Box<MeetingSnapshot>),
    ParticipantJoined(ParticipantJoined),
    ParticipantLeft(ParticipantLeft),
    PeerDisconnected(PeerDisconnected),
    MeetingLockChanged(MeetingLockChanged),
    MeetingPermissionsUpdated(MeetingPermissionsUpdated),
    RenamePermissionUpdated(RenamePermissionUpdated),
    MeetingNameChanged(MeetingNameChanged),
    ParticipantSpotlighted(ParticipantSpotlighted),
    SpotlightRemoved(SpotlightRemoved),
    ParticipantMuted(ParticipantMuted),
    ForceMute(ForceMute),
    CohostAssigned(CohostAssigned),
    MadeCohost(MadeCohost),
    ParticipantKicked(ParticipantKicked),
    KickedFromMeeting(KickedFromMeeting),
    MeetingEnded(MeetingEnded),
    HostLeft(HostLeft),
    MadeHost(MadeHost),
    MeetingLocked(MeetingLocked),
    ParticipantAudioChanged(ParticipantAudioChanged),
    ParticipantVideoChanged(ParticipantVideoChanged),
    ScreenShareStarted(ScreenShareStarted),
    ScreenShareStopped(ParticipantRef),
    HandRaised(ParticipantRef),
    HandLowered(ParticipantRef),
    InitiateConnection(InitiateConnection),
    RestartConnection(RestartRequest),
    ConnectionHealthCheck(HealthCheck),
    Offer(InboundDescription),
    Answer(InboundDescription),
    IceCandidate(InboundCandidate),
    ActionError(ActionError),
    MeetingError(MeetingError),
}

impl ServerMessage {
    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected(_) => "connected",
            ServerMessage::JoinedMeeting(_) => "joined-meeting",
            ServerMessage::ParticipantJoined(_) => "participant-joined",
            ServerMessage::ParticipantLeft(_) => "participant-left",
            ServerMessage::PeerDisconnected(_) => "peer-disconnected",
            ServerMessage::MeetingLockChanged(_) => "meeting-lock-changed",
            ServerMessage::MeetingPermissionsUpdated(_) => "meeting-permissions-updated",
            ServerMessage::RenamePermissionUpdated(_) => "rename-permission-updated",
            ServerMessage::MeetingNameChanged(_) => "meeting-name-changed",
            ServerMessage::ParticipantSpotlighted(_) => "participant-spotlighted",
            ServerMessage::SpotlightRemoved(_) => "spotlight-removed",
            ServerMessage::ParticipantMuted(_) => "participant-muted",
            ServerMessage::ForceMute(_) => "force-mute",
            ServerMessage::CohostAssigned(_) => "cohost-assigned",
            ServerMessage::MadeCohost(_) => "made-cohost",
            ServerMessage::ParticipantKicked(_) => "participant-kicked",
            ServerMessage::KickedFromMeeting(_) => "kicked-from-meeting",
            ServerMessage::MeetingEnded(_) => "meeting-ended",
            ServerMessage::HostLeft(_) => "host-left",
            ServerMessage::MadeHost(_) => "made-host",
            ServerMessage::MeetingLocked(_) => "meeting-locked",
            ServerMessage::ParticipantAudioChanged(_) => "participant-audio-changed",
            ServerMessage::ParticipantVideoChanged(_) => "participant-video-changed",
            ServerMessage::ScreenShareStarted(_) => "screen-share-started",
            ServerMessage::ScreenShareStopped(_) => "screen-share-stopped",
            ServerMessage::HandRaised(_) => "hand-raised",
            ServerMessage::HandLowered(_) => "hand-lowered",
            ServerMessage::InitiateConnection(_) => "initiate-connection",
            ServerMessage::RestartConnection(_) => "restart-connection",
            ServerMessage::ConnectionHealthCheck(_) => "connection-health-check",
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Answer(_) => "answer",
            ServerMessage::IceCandidate(_) => "ice-candidate",
            ServerMessage::ActionError(_) => "action-error",
            ServerMessage::MeetingError(_) => "meeting-error",
        }
    }

    /// Messages that end the recipient's session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerMessage::MeetingEnded(_) | ServerMessage::KickedFromMeeting(_)
        )
    }
}

//! Shared data carried inside signaling messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::secret::{serialize_exposed, SecretString};
use common::types::{ConnectionId, MeetingId};
use serde::{Deserialize, Serialize};

/// Public STUN servers handed out when nothing else is configured.
pub const DEFAULT_STUN_URLS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Liveness state of a participant's relay connection as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Unhealthy,
}

/// State of a point-to-point media transport between two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportState {
    #[default]
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Checking => "checking",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        }
    }
}

/// Why a participant is no longer in a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReason {
    /// Participant left on their own.
    Left,
    /// Transport dropped.
    Disconnected,
    /// Removed by the host or a co-host.
    Kicked,
    /// The host left and handed the meeting over.
    HostLeft,
}

/// Meeting-wide permission toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    /// Co-hosts may rename the meeting.
    pub allow_rename: bool,
    pub chat_enabled: bool,
    /// Regular participants may share their screen.
    pub allow_screen_share: bool,
    /// Regular participants may unmute themselves.
    pub allow_self_unmute: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            allow_rename: false,
            chat_enabled: true,
            allow_screen_share: true,
            allow_self_unmute: true,
        }
    }
}

/// Partial update to [`Permissions`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_rename: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_screen_share: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_self_unmute: Option<bool>,
}

impl PermissionsPatch {
    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow_rename.is_none()
            && self.chat_enabled.is_none()
            && self.allow_screen_share.is_none()
            && self.allow_self_unmute.is_none()
    }

    /// Apply the patch in place.
    pub fn apply(&self, permissions: &mut Permissions) {
        if let Some(v) = self.allow_rename {
            permissions.allow_rename = v;
        }
        if let Some(v) = self.chat_enabled {
            permissions.chat_enabled = v;
        }
        if let Some(v) = self.allow_screen_share {
            permissions.allow_screen_share = v;
        }
        if let Some(v) = self.allow_self_unmute {
            permissions.allow_self_unmute = v;
        }
    }
}

/// A STUN or TURN server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_exposed"
    )]
    pub credential: Option<SecretString>,
}

impl IceServer {
    /// Build a credential-less STUN entry.
    #[must_use]
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Transport helper servers and link options handed to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
    pub bundle_policy: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_URLS.iter().map(|url| IceServer::stun(*url)).collect(),
            ice_candidate_pool_size: 10,
            bundle_policy: "max-bundle".to_string(),
        }
    }
}

/// One discovered network path, relayed verbatim between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Client-visible view of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ConnectionId,
    pub name: String,
    pub is_host: bool,
    pub is_co_host: bool,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_screen_sharing: bool,
    pub hand_raised: bool,
    pub joined_at: DateTime<Utc>,
    pub connection_state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_quality: Option<f64>,
}

/// Metadata about an active screen share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenShareInfo {
    pub participant_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Full meeting state sent to a participant when they join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSnapshot {
    pub meeting_id: MeetingId,
    pub meeting_name: String,
    /// Connection id of the recipient.
    pub self_id: ConnectionId,
    pub is_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<ConnectionId>,
    pub host_name: String,
    pub participants: Vec<ParticipantView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotlighted_participant: Option<ConnectionId>,
    pub raised_hands: Vec<ConnectionId>,
    pub screen_shares: Vec<ScreenShareInfo>,
    pub is_locked: bool,
    pub permissions: Permissions,
    pub transport_config: TransportConfig,
    pub created_at: DateTime<Utc>,
    /// Per-connection failure counters, keyed by connection id.
    #[serde(default)]
    pub connection_attempts: BTreeMap<ConnectionId, u32>,
}

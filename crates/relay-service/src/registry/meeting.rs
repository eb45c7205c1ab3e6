//! Meeting and participant state owned by the registry.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, MeetingId};
use signaling_protocol::{
    ConnectionState, MeetingSnapshot, ParticipantView, Permissions, ScreenShareInfo,
    TransportConfig,
};
use tokio::time::Instant;

use crate::errors::RelayError;

/// A participant in a meeting.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Connection id, also the participant id.
    pub id: ConnectionId,
    pub name: String,
    pub is_host: bool,
    pub is_co_host: bool,
    pub is_muted: bool,
    pub is_camera_off: bool,
    /// Local media is up and the client accepts peer links.
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    pub connection_state: ConnectionState,
    pub network_quality: Option<f64>,
}

impl Participant {
    pub(crate) fn new(id: ConnectionId, name: String, is_host: bool, now: Instant) -> Self {
        Self {
            id,
            name,
            is_host,
            is_co_host: false,
            is_muted: false,
            is_camera_off: false,
            is_ready: false,
            joined_at: Utc::now(),
            last_heartbeat: now,
            connection_state: ConnectionState::Connected,
            network_quality: None,
        }
    }

    /// Host or co-host.
    #[must_use]
    pub fn is_moderator(&self) -> bool {
        self.is_host || self.is_co_host
    }
}

/// An active screen share.
#[derive(Debug, Clone)]
pub struct ScreenShare {
    pub stream_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Transport failure counters reported by one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionAttempts {
    /// Failures reported since the last successful connection.
    pub failures: u32,
    /// Failures reported over the participant's lifetime.
    pub total_failures: u32,
}

/// A meeting and everything in it.
#[derive(Debug, Clone)]
pub struct Meeting {
    id: MeetingId,
    pub(crate) name: String,
    host_id: Option<ConnectionId>,
    host_name: String,
    created_at: DateTime<Utc>,
    pub(crate) is_locked: bool,
    pub(crate) permissions: Permissions,
    /// Join order is significant for host succession.
    participants: Vec<Participant>,
    pub(crate) spotlighted: Option<ConnectionId>,
    raised_hands: Vec<ConnectionId>,
    screen_shares: BTreeMap<ConnectionId, ScreenShare>,
    pub(crate) connection_attempts: HashMap<ConnectionId, ConnectionAttempts>,
}

impl Meeting {
    pub(crate) fn new(id: MeetingId, name: String, host: Participant) -> Self {
        Self {
            id,
            name,
            host_id: Some(host.id.clone()),
            host_name: host.name.clone(),
            created_at: Utc::now(),
            is_locked: false,
            permissions: Permissions::default(),
            participants: vec![host],
            spotlighted: None,
            raised_hands: Vec::new(),
            screen_shares: BTreeMap::new(),
            connection_attempts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &MeetingId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn host_id(&self) -> Option<&ConnectionId> {
        self.host_id.as_ref()
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    #[must_use]
    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    #[must_use]
    pub fn spotlighted(&self) -> Option<&ConnectionId> {
        self.spotlighted.as_ref()
    }

    /// Participants in join order.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn participant(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub(crate) fn participant_mut(&mut self, id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn raised_hands(&self) -> &[ConnectionId] {
        &self.raised_hands
    }

    #[must_use]
    pub fn is_screen_sharing(&self, id: &ConnectionId) -> bool {
        self.screen_shares.contains_key(id)
    }

    #[must_use]
    pub fn connection_attempts(&self, id: &ConnectionId) -> ConnectionAttempts {
        self.connection_attempts.get(id).copied().unwrap_or_default()
    }

    /// Connection ids of every participant, in join order.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub(crate) fn require_participant(&self, id: &ConnectionId) -> Result<&Participant, RelayError> {
        self.participant(id)
            .ok_or_else(|| RelayError::ParticipantNotFound(id.to_string()))
    }

    pub(crate) fn require_host(&self, id: &ConnectionId, denied: &str) -> Result<&Participant, RelayError> {
        let participant = self.require_participant(id)?;
        if participant.is_host {
            Ok(participant)
        } else {
            Err(RelayError::Forbidden(denied.to_string()))
        }
    }

    pub(crate) fn require_moderator(
        &self,
        id: &ConnectionId,
        denied: &str,
    ) -> Result<&Participant, RelayError> {
        let participant = self.require_participant(id)?;
        if participant.is_moderator() {
            Ok(participant)
        } else {
            Err(RelayError::Forbidden(denied.to_string()))
        }
    }

    pub(crate) fn add_participant(&mut self, participant: Participant) {
        if participant.is_host {
            self.host_id = Some(participant.id.clone());
            self.host_name.clone_from(&participant.name);
        }
        self.participants.push(participant);
    }

    /// Remove a participant and every piece of state that references them.
    pub(crate) fn remove_participant(&mut self, id: &ConnectionId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        let removed = self.participants.remove(index);

        if self.spotlighted.as_ref() == Some(id) {
            self.spotlighted = None;
        }
        self.raised_hands.retain(|h| h != id);
        self.screen_shares.remove(id);
        self.connection_attempts.remove(id);
        if self.host_id.as_ref() == Some(id) {
            self.host_id = None;
        }
        Some(removed)
    }

    /// Promote the first co-host, else the first remaining participant.
    ///
    /// The successor's co-host flag is cleared. Returns `None` when the
    /// meeting is empty.
    pub(crate) fn promote_successor(&mut self) -> Option<ConnectionId> {
        let index = self
            .participants
            .iter()
            .position(|p| p.is_co_host)
            .or_else(|| (!self.participants.is_empty()).then_some(0))?;

        let successor = self.participants.get_mut(index)?;
        successor.is_host = true;
        successor.is_co_host = false;
        self.host_id = Some(successor.id.clone());
        self.host_name.clone_from(&successor.name);
        Some(successor.id.clone())
    }

    pub(crate) fn raise_hand(&mut self, id: &ConnectionId) -> bool {
        if self.raised_hands.contains(id) {
            return false;
        }
        self.raised_hands.push(id.clone());
        true
    }

    pub(crate) fn lower_hand(&mut self, id: &ConnectionId) -> bool {
        let before = self.raised_hands.len();
        self.raised_hands.retain(|h| h != id);
        before != self.raised_hands.len()
    }

    pub(crate) fn start_screen_share(&mut self, id: &ConnectionId, stream_id: Option<String>) {
        self.screen_shares.insert(
            id.clone(),
            ScreenShare {
                stream_id,
                started_at: Utc::now(),
            },
        );
    }

    pub(crate) fn stop_screen_share(&mut self, id: &ConnectionId) -> bool {
        self.screen_shares.remove(id).is_some()
    }

    /// Client view of one participant.
    #[must_use]
    pub fn view_of(&self, participant: &Participant) -> ParticipantView {
        ParticipantView {
            id: participant.id.clone(),
            name: participant.name.clone(),
            is_host: participant.is_host,
            is_co_host: participant.is_co_host,
            is_muted: participant.is_muted,
            is_camera_off: participant.is_camera_off,
            is_screen_sharing: self.screen_shares.contains_key(&participant.id),
            hand_raised: self.raised_hands.contains(&participant.id),
            joined_at: participant.joined_at,
            connection_state: participant.connection_state,
            network_quality: participant.network_quality,
        }
    }

    /// Client view of every participant, in join order.
    #[must_use]
    pub fn participant_views(&self) -> Vec<ParticipantView> {
        self.participants.iter().map(|p| self.view_of(p)).collect()
    }

    /// Full state as seen by `recipient`.
    #[must_use]
    pub fn snapshot_for(&self, recipient: &ConnectionId, transport: &TransportConfig) -> MeetingSnapshot {
        MeetingSnapshot {
            meeting_id: self.id.clone(),
            meeting_name: self.name.clone(),
            self_id: recipient.clone(),
            is_host: self.host_id.as_ref() == Some(recipient),
            host_id: self.host_id.clone(),
            host_name: self.host_name.clone(),
            participants: self.participant_views(),
            spotlighted_participant: self.spotlighted.clone(),
            raised_hands: self.raised_hands.clone(),
            screen_shares: self
                .screen_shares
                .iter()
                .map(|(id, share)| ScreenShareInfo {
                    participant_id: id.clone(),
                    stream_id: share.stream_id.clone(),
                    started_at: share.started_at,
                })
                .collect(),
            is_locked: self.is_locked,
            permissions: self.permissions,
            transport_config: transport.clone(),
            created_at: self.created_at,
            connection_attempts: self
                .connection_attempts
                .iter()
                .map(|(id, attempts)| (id.clone(), attempts.failures))
                .collect(),
        }
    }
}

//! Meeting registry.
//!
//! The registry is the single writer of meeting and participant state. It
//! has no knowledge of transports: every operation returns what changed so
//! the relay can decide who to tell.
//!
//! Invariants held after every operation:
//!
//! - a meeting has at most one participant with `is_host`
//! - a meeting with zero participants does not exist
//! - a spotlighted participant is a current participant
//! - every participant has exactly one membership entry, pointing at the
//!   meeting that owns it

mod meeting;

use std::collections::HashMap;
use std::time::Duration;

use common::types::{ConnectionId, MeetingId};
use signaling_protocol::{ConnectionState, Permissions, PermissionsPatch, TransportState};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::RelayError;

pub use meeting::{ConnectionAttempts, Meeting, Participant, ScreenShare};

/// Capacity limits enforced by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_meetings: usize,
    pub max_participants_per_meeting: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_meetings: 1000,
            max_participants_per_meeting: 100,
        }
    }
}

/// Back-reference from a connection to the meeting that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub meeting_id: MeetingId,
    pub is_host: bool,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: Participant,
    /// The connection was already a participant; nothing changed.
    pub rejoined: bool,
}

/// Result of a participant leaving, being kicked, or disconnecting.
#[derive(Debug, Clone)]
pub struct Departure {
    pub meeting_id: MeetingId,
    pub participant: Participant,
    /// Set when the departing participant was host and someone took over.
    pub successor: Option<ConnectionId>,
    /// The meeting was deleted because nobody was left.
    pub meeting_deleted: bool,
}

/// Result of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub old_name: String,
    pub new_name: String,
}

/// Authoritative in-memory store of meetings and participants.
#[derive(Debug, Default)]
pub struct MeetingRegistry {
    meetings: HashMap<MeetingId, Meeting>,
    memberships: HashMap<ConnectionId, Membership>,
    limits: RegistryLimits,
}

impl MeetingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            meetings: HashMap::new(),
            memberships: HashMap::new(),
            limits,
        }
    }

    #[must_use]
    pub fn meeting(&self, id: &MeetingId) -> Option<&Meeting> {
        self.meetings.get(id)
    }

    #[must_use]
    pub fn membership(&self, conn: &ConnectionId) -> Option<&Membership> {
        self.memberships.get(conn)
    }

    #[must_use]
    pub fn meeting_count(&self) -> usize {
        self.meetings.len()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.memberships.len()
    }

    pub fn meetings(&self) -> impl Iterator<Item = &Meeting> {
        self.meetings.values()
    }

    /// Resolve a connection to its meeting id.
    ///
    /// # Errors
    ///
    /// Returns `NotInMeeting` if the connection has no membership.
    pub fn meeting_of(&self, conn: &ConnectionId) -> Result<MeetingId, RelayError> {
        self.memberships
            .get(conn)
            .map(|m| m.meeting_id.clone())
            .ok_or(RelayError::NotInMeeting)
    }

    fn meeting_mut(&mut self, id: &MeetingId) -> Result<&mut Meeting, RelayError> {
        self.meetings
            .get_mut(id)
            .ok_or_else(|| RelayError::MeetingNotFound(id.to_string()))
    }

    fn meeting_ref(&self, id: &MeetingId) -> Result<&Meeting, RelayError> {
        self.meetings
            .get(id)
            .ok_or_else(|| RelayError::MeetingNotFound(id.to_string()))
    }

    fn ensure_free(&self, conn: &ConnectionId, meeting_id: &MeetingId) -> Result<(), RelayError> {
        match self.memberships.get(conn) {
            Some(m) if &m.meeting_id != meeting_id => Err(RelayError::Conflict(
                "You are already in another meeting".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Create a meeting with `host_conn` as its host and only participant.
    ///
    /// A blank or missing name defaults to `"{host_name}'s Meeting"`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the id exists or the host is already in a meeting,
    /// `CapacityExceeded` at the meeting limit.
    pub fn create_meeting(
        &mut self,
        id: MeetingId,
        host_conn: ConnectionId,
        host_name: &str,
        meeting_name: Option<&str>,
        now: Instant,
    ) -> Result<&Meeting, RelayError> {
        if self.meetings.contains_key(&id) {
            return Err(RelayError::Conflict("Meeting already exists".to_string()));
        }
        if self.memberships.contains_key(&host_conn) {
            return Err(RelayError::Conflict(
                "You are already in another meeting".to_string(),
            ));
        }
        if self.meetings.len() >= self.limits.max_meetings {
            return Err(RelayError::CapacityExceeded(format!(
                "meeting limit {} reached",
                self.limits.max_meetings
            )));
        }

        let host_name = host_name.trim().to_string();
        let name = meeting_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| format!("{host_name}'s Meeting"), str::to_string);

        let host = Participant::new(host_conn.clone(), host_name, true, now);
        self.memberships.insert(
            host_conn.clone(),
            Membership {
                meeting_id: id.clone(),
                is_host: true,
            },
        );

        info!(
            target: "relay.registry",
            meeting_id = %id,
            host = %host_conn,
            "Meeting created"
        );

        Ok(self
            .meetings
            .entry(id.clone())
            .or_insert_with(|| Meeting::new(id, name, host)))
    }

    /// Add `conn` to a meeting.
    ///
    /// Joining a meeting the connection is already in returns the existing
    /// participant unchanged, even when the meeting is locked.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound`, `Locked` for non-members of a locked meeting,
    /// `Conflict` when joining as host a meeting that has one or when the
    /// connection is in another meeting, `CapacityExceeded` when full.
    pub fn join(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        name: &str,
        as_host: bool,
        now: Instant,
    ) -> Result<JoinOutcome, RelayError> {
        self.ensure_free(conn, meeting_id)?;
        let limit = self.limits.max_participants_per_meeting;
        let meeting = self.meeting_mut(meeting_id)?;

        if let Some(existing) = meeting.participant(conn) {
            return Ok(JoinOutcome {
                participant: existing.clone(),
                rejoined: true,
            });
        }
        if meeting.is_locked() {
            return Err(RelayError::Locked(meeting_id.to_string()));
        }
        if as_host && meeting.host_id().is_some() {
            return Err(RelayError::Conflict(
                "Meeting already has a host".to_string(),
            ));
        }
        if meeting.participant_count() >= limit {
            return Err(RelayError::CapacityExceeded(format!(
                "participant limit {limit} reached"
            )));
        }

        let participant = Participant::new(conn.clone(), name.trim().to_string(), as_host, now);
        meeting.add_participant(participant.clone());
        self.memberships.insert(
            conn.clone(),
            Membership {
                meeting_id: meeting_id.clone(),
                is_host: as_host,
            },
        );

        debug!(
            target: "relay.registry",
            meeting_id = %meeting_id,
            participant = %conn,
            "Participant joined"
        );

        Ok(JoinOutcome {
            participant,
            rejoined: false,
        })
    }

    /// Remove `conn` from its meeting, transferring host if needed.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound` if either is already gone.
    pub fn leave(&mut self, meeting_id: &MeetingId, conn: &ConnectionId) -> Result<Departure, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let participant = meeting
            .remove_participant(conn)
            .ok_or_else(|| RelayError::ParticipantNotFound(conn.to_string()))?;

        let successor = if participant.is_host {
            meeting.promote_successor()
        } else {
            None
        };
        let meeting_deleted = meeting.participant_count() == 0;

        self.memberships.remove(conn);
        if let Some(new_host) = &successor {
            if let Some(m) = self.memberships.get_mut(new_host) {
                m.is_host = true;
            }
            info!(
                target: "relay.registry",
                meeting_id = %meeting_id,
                old_host = %conn,
                new_host = %new_host,
                "Host transferred"
            );
        }
        if meeting_deleted {
            self.meetings.remove(meeting_id);
            info!(
                target: "relay.registry",
                meeting_id = %meeting_id,
                "Meeting deleted, no participants left"
            );
        }

        Ok(Departure {
            meeting_id: meeting_id.clone(),
            participant,
            successor,
            meeting_deleted,
        })
    }

    /// Delete a meeting and sever every participant's back-reference.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless `conn` is the host.
    pub fn end_for_all(&mut self, meeting_id: &MeetingId, conn: &ConnectionId) -> Result<Meeting, RelayError> {
        self.meeting_ref(meeting_id)?
            .require_host(conn, "Only host can end the meeting for everyone")?;
        self.end_meeting(meeting_id)
            .ok_or_else(|| RelayError::MeetingNotFound(meeting_id.to_string()))
    }

    /// Delete a meeting without an authorization check.
    pub fn end_meeting(&mut self, meeting_id: &MeetingId) -> Option<Meeting> {
        let meeting = self.meetings.remove(meeting_id)?;
        for participant in meeting.participants() {
            self.memberships.remove(&participant.id);
        }
        info!(
            target: "relay.registry",
            meeting_id = %meeting_id,
            participants = meeting.participant_count(),
            "Meeting ended"
        );
        Some(meeting)
    }

    /// # Errors
    ///
    /// `Forbidden` unless `conn` is the host.
    pub fn lock(&mut self, meeting_id: &MeetingId, conn: &ConnectionId, desired: bool) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_host(conn, "Only host can lock/unlock the meeting")?;
        meeting.is_locked = desired;
        Ok(())
    }

    /// # Errors
    ///
    /// `Forbidden` unless `conn` is the host.
    pub fn update_permissions(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        patch: &PermissionsPatch,
    ) -> Result<Permissions, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_host(conn, "Only host can update meeting permissions")?;
        patch.apply(&mut meeting.permissions);
        Ok(meeting.permissions)
    }

    /// Rename the meeting. Co-hosts may rename when `allow_rename` is set.
    ///
    /// # Errors
    ///
    /// `Validation` for names outside 1..=100 chars, `Forbidden` for
    /// anyone else.
    pub fn rename(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        new_name: &str,
    ) -> Result<Rename, RelayError> {
        let new_name = new_name.trim();
        let len = new_name.chars().count();
        if len == 0 || len > signaling_protocol::codec::MAX_MEETING_NAME_LEN {
            return Err(RelayError::Validation("Invalid meeting name".to_string()));
        }

        let meeting = self.meeting_mut(meeting_id)?;
        let caller = meeting.require_participant(conn)?;
        let allowed = caller.is_host || (caller.is_co_host && meeting.permissions.allow_rename);
        if !allowed {
            return Err(RelayError::Forbidden(
                "You do not have permission to rename the meeting".to_string(),
            ));
        }

        let old_name = std::mem::replace(&mut meeting.name, new_name.to_string());
        Ok(Rename {
            old_name,
            new_name: new_name.to_string(),
        })
    }

    /// # Errors
    ///
    /// `Forbidden` unless `conn` is host or co-host, `ParticipantNotFound`
    /// for an unknown target.
    pub fn spotlight(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        target: &ConnectionId,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_moderator(conn, "Only host or co-host can spotlight participants")?;
        meeting.require_participant(target)?;
        meeting.spotlighted = Some(target.clone());
        Ok(())
    }

    /// # Errors
    ///
    /// `Forbidden` unless `conn` is host or co-host.
    pub fn remove_spotlight(&mut self, meeting_id: &MeetingId, conn: &ConnectionId) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_moderator(conn, "Only host or co-host can remove the spotlight")?;
        meeting.spotlighted = None;
        Ok(())
    }

    /// Mute or unmute another participant.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless `conn` is host or co-host; a co-host cannot mute
    /// the host.
    pub fn mute(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        target: &ConnectionId,
        muted: bool,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let caller_is_host = meeting
            .require_moderator(conn, "Only host or co-host can mute participants")?
            .is_host;
        let target_is_host = meeting.require_participant(target)?.is_host;
        if target_is_host && !caller_is_host {
            return Err(RelayError::Forbidden("Cannot mute the host".to_string()));
        }
        if let Some(p) = meeting.participant_mut(target) {
            p.is_muted = muted;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `Forbidden` unless `conn` is host; `Validation` when targeting the host.
    pub fn make_co_host(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        target: &ConnectionId,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_host(conn, "Only host can assign co-hosts")?;
        if meeting.require_participant(target)?.is_host {
            return Err(RelayError::Validation(
                "The host cannot be made co-host".to_string(),
            ));
        }
        if let Some(p) = meeting.participant_mut(target) {
            p.is_co_host = true;
        }
        Ok(())
    }

    /// Remove another participant.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless `conn` is host or co-host, when targeting the host,
    /// or when a co-host targets another co-host. `Validation` when kicking
    /// oneself.
    pub fn kick(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        target: &ConnectionId,
    ) -> Result<Departure, RelayError> {
        if conn == target {
            return Err(RelayError::Validation("Cannot kick yourself".to_string()));
        }
        let meeting = self.meeting_ref(meeting_id)?;
        let caller_is_host = meeting
            .require_moderator(conn, "Only host or co-host can remove participants")?
            .is_host;
        let victim = meeting.require_participant(target)?;
        if victim.is_host {
            return Err(RelayError::Forbidden("Cannot remove the host".to_string()));
        }
        if victim.is_co_host && !caller_is_host {
            return Err(RelayError::Forbidden(
                "Only host can remove a co-host".to_string(),
            ));
        }
        self.leave(meeting_id, target)
    }

    /// Update the caller's own microphone state.
    ///
    /// # Errors
    ///
    /// `Forbidden` when unmuting while `allow_self_unmute` is off and the
    /// caller is neither host nor co-host.
    pub fn set_audio(&mut self, meeting_id: &MeetingId, conn: &ConnectionId, is_muted: bool) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let caller = meeting.require_participant(conn)?;
        if !is_muted && !caller.is_moderator() && !meeting.permissions.allow_self_unmute {
            return Err(RelayError::Forbidden(
                "The host has disabled unmuting".to_string(),
            ));
        }
        if let Some(p) = meeting.participant_mut(conn) {
            p.is_muted = is_muted;
        }
        Ok(())
    }

    /// Update the caller's own camera state.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound`.
    pub fn set_video(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        is_camera_off: bool,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let p = meeting
            .participant_mut(conn)
            .ok_or_else(|| RelayError::ParticipantNotFound(conn.to_string()))?;
        p.is_camera_off = is_camera_off;
        Ok(())
    }

    /// Mark the caller ready for peer links.
    ///
    /// Returns the other ready participants in join order; each pair needs
    /// a link.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound`.
    pub fn set_ready(&mut self, meeting_id: &MeetingId, conn: &ConnectionId) -> Result<Vec<ConnectionId>, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let p = meeting
            .participant_mut(conn)
            .ok_or_else(|| RelayError::ParticipantNotFound(conn.to_string()))?;
        p.is_ready = true;
        Ok(meeting
            .participants()
            .iter()
            .filter(|p| p.is_ready && &p.id != conn)
            .map(|p| p.id.clone())
            .collect())
    }

    /// Refresh a participant's heartbeat. Returns false if unknown.
    pub fn record_heartbeat(&mut self, conn: &ConnectionId, now: Instant) -> bool {
        let Some(meeting_id) = self.memberships.get(conn).map(|m| m.meeting_id.clone()) else {
            return false;
        };
        let Some(p) = self
            .meetings
            .get_mut(&meeting_id)
            .and_then(|m| m.participant_mut(conn))
        else {
            return false;
        };
        p.last_heartbeat = now;
        p.connection_state = ConnectionState::Connected;
        true
    }

    /// Record a peer transport state reported by `conn` about `target`.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` if either side is not in the meeting.
    pub fn record_connection_state(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        target: &ConnectionId,
        state: TransportState,
    ) -> Result<ConnectionAttempts, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_participant(target)?;
        let p = meeting
            .participant_mut(conn)
            .ok_or_else(|| RelayError::ParticipantNotFound(conn.to_string()))?;

        p.connection_state = match state {
            TransportState::Connected => ConnectionState::Connected,
            TransportState::Failed => ConnectionState::Unhealthy,
            _ => ConnectionState::Connecting,
        };

        let attempts = meeting.connection_attempts.entry(conn.clone()).or_default();
        match state {
            TransportState::Connected => attempts.failures = 0,
            TransportState::Failed => {
                attempts.failures = attempts.failures.saturating_add(1);
                attempts.total_failures = attempts.total_failures.saturating_add(1);
            }
            _ => {}
        }
        Ok(*attempts)
    }

    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound`.
    pub fn record_network_quality(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        score: f64,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let p = meeting
            .participant_mut(conn)
            .ok_or_else(|| RelayError::ParticipantNotFound(conn.to_string()))?;
        p.network_quality = Some(score);
        Ok(())
    }

    /// # Errors
    ///
    /// `Forbidden` when screen sharing is disabled for regular participants.
    pub fn start_screen_share(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        stream_id: Option<String>,
    ) -> Result<(), RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        let caller = meeting.require_participant(conn)?;
        if !caller.is_moderator() && !meeting.permissions.allow_screen_share {
            return Err(RelayError::Forbidden(
                "The host has disabled screen sharing".to_string(),
            ));
        }
        meeting.start_screen_share(conn, stream_id);
        Ok(())
    }

    /// Returns whether a share was active.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound`.
    pub fn stop_screen_share(&mut self, meeting_id: &MeetingId, conn: &ConnectionId) -> Result<bool, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_participant(conn)?;
        Ok(meeting.stop_screen_share(conn))
    }

    /// Returns whether the hand state changed.
    ///
    /// # Errors
    ///
    /// `MeetingNotFound` or `ParticipantNotFound`.
    pub fn set_hand_raised(
        &mut self,
        meeting_id: &MeetingId,
        conn: &ConnectionId,
        raised: bool,
    ) -> Result<bool, RelayError> {
        let meeting = self.meeting_mut(meeting_id)?;
        meeting.require_participant(conn)?;
        Ok(if raised {
            meeting.raise_hand(conn)
        } else {
            meeting.lower_hand(conn)
        })
    }

    /// Participants whose last heartbeat is older than `threshold`.
    #[must_use]
    pub fn stale_participants(&self, now: Instant, threshold: Duration) -> Vec<ConnectionId> {
        self.meetings
            .values()
            .flat_map(Meeting::participants)
            .filter(|p| now.saturating_duration_since(p.last_heartbeat) > threshold)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Mark participants unhealthy after an unanswered probe.
    pub fn mark_unhealthy(&mut self, conns: &[ConnectionId]) {
        for conn in conns {
            let Some(meeting_id) = self.memberships.get(conn).map(|m| m.meeting_id.clone()) else {
                continue;
            };
            if let Some(p) = self
                .meetings
                .get_mut(&meeting_id)
                .and_then(|m| m.participant_mut(conn))
            {
                p.connection_state = ConnectionState::Unhealthy;
            }
        }
    }
}

//! Signaling relay.
//!
//! Translates decoded client messages into registry calls and decides who
//! hears about the result. The relay performs no I/O: every step returns an
//! [`Outbox`] of deliveries that the actor layer writes to sockets in order.
//!
//! Failures are reported only to the caller. Join failures reply on the
//! `meeting-error` channel (or `meeting-locked`), everything else replies
//! `action-error` naming the event.

mod outbox;

use std::str::FromStr;
use std::time::Duration;

use common::types::{ConnectionId, MeetingId};
use serde::Serialize;
use signaling_protocol::messages::{
    ActionError, CohostAssigned, ForceMute, HealthCheck, HostLeft, InboundCandidate,
    InboundDescription, InitiateConnection, KickedFromMeeting, MadeCohost, MadeHost,
    MeetingEnded, MeetingError, MeetingLockChanged, MeetingLocked, MeetingNameChanged,
    MeetingPermissionsUpdated,
    NewHost, ParticipantAudioChanged, ParticipantJoined, ParticipantKicked, ParticipantLeft,
    ParticipantMuted, ParticipantRef, ParticipantSpotlighted, ParticipantVideoChanged,
    PeerDisconnected, RenamePermissionUpdated, RestartRequest, ScreenShareStarted,
    SpotlightRemoved,
};
use signaling_protocol::{
    decode_client_message, ClientMessage, LeaveReason, ServerMessage, TransportConfig,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{RelayError, LOCKED_MESSAGE};
use crate::observability::metrics;
use crate::registry::{Departure, Meeting, MeetingRegistry, RegistryLimits};

pub use outbox::{Delivery, Outbox};

/// Reason sent in `meeting-ended` when the host asks without giving one.
pub const HOST_ENDED_REASON: &str = "host-ended";

/// Reason sent in `meeting-ended` when the host's socket drops under the
/// `end` policy.
pub const HOST_DISCONNECTED_REASON: &str = "host-disconnected";

/// What happens to a meeting when its host's transport drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostDisconnectPolicy {
    /// Promote a successor exactly like an explicit host leave.
    #[default]
    TransferHost,
    /// End the meeting for everyone.
    EndMeeting,
}

impl FromStr for HostDisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transfer" => Ok(Self::TransferHost),
            "end" => Ok(Self::EndMeeting),
            other => Err(format!("unknown host disconnect policy: {other}")),
        }
    }
}

/// Relay behaviour knobs, taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub limits: RegistryLimits,
    pub transport: TransportConfig,
    pub host_disconnect_policy: HostDisconnectPolicy,
    /// Participants silent for longer than this get a liveness probe.
    pub heartbeat_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            limits: RegistryLimits::default(),
            transport: TransportConfig::default(),
            host_disconnect_policy: HostDisconnectPolicy::default(),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Public summary of a meeting, served by `GET /api/meetings/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingInfo {
    pub meeting_id: MeetingId,
    pub meeting_name: String,
    pub participant_count: usize,
    pub is_locked: bool,
}

/// Owns the registry and maps client intents to deliveries.
#[derive(Debug)]
pub struct SignalingRelay {
    registry: MeetingRegistry,
    settings: RelaySettings,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            registry: MeetingRegistry::new(settings.limits),
            settings,
        }
    }

    /// Read access for status queries and tests.
    #[must_use]
    pub fn registry(&self) -> &MeetingRegistry {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    #[must_use]
    pub fn meeting_info(&self, meeting_id: &MeetingId) -> Option<MeetingInfo> {
        self.registry.meeting(meeting_id).map(|m| MeetingInfo {
            meeting_id: m.id().clone(),
            meeting_name: m.name().to_string(),
            participant_count: m.participant_count(),
            is_locked: m.is_locked(),
        })
    }

    /// Decode a raw text frame and handle it.
    ///
    /// Malformed frames are answered on the channel the event would have
    /// used and never reach the registry.
    pub fn handle_frame(&mut self, conn: &ConnectionId, frame: &str, now: Instant) -> Outbox {
        match decode_client_message(frame) {
            Ok(message) => self.handle(conn, message, now),
            Err(err) => {
                debug!(
                    target: "relay.actor.relay",
                    connection_id = %conn,
                    event = err.event.as_deref().unwrap_or("unknown"),
                    error = %err.message,
                    "Rejected malformed frame"
                );
                metrics::record_signaling_error("validation");
                let mut out = Outbox::new();
                out.send(conn, err.to_reply());
                out
            }
        }
    }

    /// Handle one decoded client message.
    pub fn handle(&mut self, conn: &ConnectionId, message: ClientMessage, now: Instant) -> Outbox {
        let started = std::time::Instant::now();
        let event = message.event_name();
        let join_target = match &message {
            ClientMessage::JoinAsHost(j) => Some(j.meeting_id.clone()),
            ClientMessage::JoinMeeting(j) => Some(j.meeting_id.clone()),
            _ => None,
        };

        let mut out = Outbox::new();
        if let Err(err) = self.dispatch(conn, message, now, &mut out) {
            out.clear();
            if matches!(err, RelayError::Internal(_)) {
                warn!(
                    target: "relay.actor.relay",
                    connection_id = %conn,
                    event,
                    error = %err,
                    "Signaling step failed"
                );
            } else {
                debug!(
                    target: "relay.actor.relay",
                    connection_id = %conn,
                    event,
                    error_code = err.error_code(),
                    error = %err,
                    "Signaling request rejected"
                );
            }
            metrics::record_signaling_error(err.kind());
            out.send(conn, error_reply(event, join_target, &err));
        }

        metrics::record_message(event);
        metrics::record_message_latency(event, started.elapsed());
        self.publish_gauges();
        out
    }

    /// Run disconnect handling for a closed transport.
    ///
    /// A connection that never joined, or whose meeting is already gone,
    /// produces no deliveries.
    pub fn disconnect(&mut self, conn: &ConnectionId) -> Outbox {
        let mut out = Outbox::new();
        let Some(membership) = self.registry.membership(conn).cloned() else {
            return out;
        };

        if membership.is_host
            && self.settings.host_disconnect_policy == HostDisconnectPolicy::EndMeeting
        {
            if let Some(meeting) = self.registry.end_meeting(&membership.meeting_id) {
                let remaining: Vec<ConnectionId> = meeting
                    .connection_ids()
                    .into_iter()
                    .filter(|c| c != conn)
                    .collect();
                out.broadcast(
                    &remaining,
                    ServerMessage::PeerDisconnected(PeerDisconnected {
                        participant_id: conn.clone(),
                        is_host: true,
                    }),
                );
                out.broadcast(
                    &remaining,
                    ServerMessage::MeetingEnded(MeetingEnded {
                        meeting_id: meeting.id().clone(),
                        reason: HOST_DISCONNECTED_REASON.to_string(),
                        host_name: meeting.host_name().to_string(),
                        message: "The host has disconnected. The meeting has ended.".to_string(),
                    }),
                );
            }
        } else {
            match self.registry.leave(&membership.meeting_id, conn) {
                Ok(departure) => {
                    self.announce_departure(&mut out, &departure, LeaveReason::Disconnected, true);
                }
                Err(err) => {
                    debug!(
                        target: "relay.actor.relay",
                        connection_id = %conn,
                        error = %err,
                        "Disconnect raced with teardown"
                    );
                }
            }
        }

        info!(
            target: "relay.actor.relay",
            connection_id = %conn,
            meeting_id = %membership.meeting_id,
            was_host = membership.is_host,
            "Participant disconnected"
        );
        self.publish_gauges();
        out
    }

    /// Probe every participant whose heartbeat is older than the timeout.
    ///
    /// Probes are advisory and never disconnect anyone.
    pub fn health_sweep(&mut self, now: Instant) -> Outbox {
        let stale = self
            .registry
            .stale_participants(now, self.settings.heartbeat_timeout);
        let mut out = Outbox::new();
        if stale.is_empty() {
            return out;
        }

        out.broadcast(
            &stale,
            ServerMessage::ConnectionHealthCheck(HealthCheck {
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
        );
        self.registry.mark_unhealthy(&stale);
        metrics::record_health_probes(stale.len());
        debug!(
            target: "relay.actor.relay",
            probes = stale.len(),
            "Sent liveness probes"
        );
        out
    }

    fn publish_gauges(&self) {
        metrics::set_meetings_active(self.registry.meeting_count());
        metrics::set_participants_active(self.registry.participant_count());
    }

    fn room(&self, meeting_id: &MeetingId) -> Result<&Meeting, RelayError> {
        self.registry
            .meeting(meeting_id)
            .ok_or_else(|| RelayError::MeetingNotFound(meeting_id.to_string()))
    }

    fn name_of(&self, meeting_id: &MeetingId, conn: &ConnectionId) -> String {
        self.registry
            .meeting(meeting_id)
            .and_then(|m| m.participant(conn))
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    /// Caller's meeting, checked against the id the client claims to act on.
    fn claimed_meeting(
        &self,
        conn: &ConnectionId,
        claimed: &MeetingId,
    ) -> Result<MeetingId, RelayError> {
        let meeting_id = self.registry.meeting_of(conn)?;
        if &meeting_id != claimed {
            return Err(RelayError::Validation(
                "You are not in that meeting".to_string(),
            ));
        }
        Ok(meeting_id)
    }

    /// Caller's meeting, provided `target` is another member of it.
    fn peer_meeting(
        &self,
        conn: &ConnectionId,
        target: &ConnectionId,
    ) -> Result<MeetingId, RelayError> {
        let meeting_id = self.registry.meeting_of(conn)?;
        if conn == target {
            return Err(RelayError::Validation("Cannot signal yourself".to_string()));
        }
        if self.room(&meeting_id)?.participant(target).is_none() {
            return Err(RelayError::ParticipantNotFound(target.to_string()));
        }
        Ok(meeting_id)
    }

    fn announce_departure(
        &self,
        out: &mut Outbox,
        departure: &Departure,
        reason: LeaveReason,
        disconnected: bool,
    ) {
        if departure.meeting_deleted {
            return;
        }
        let Some(meeting) = self.registry.meeting(&departure.meeting_id) else {
            return;
        };
        let recipients = meeting.connection_ids();
        let leaver = &departure.participant;

        if disconnected {
            out.broadcast(
                &recipients,
                ServerMessage::PeerDisconnected(PeerDisconnected {
                    participant_id: leaver.id.clone(),
                    is_host: leaver.is_host,
                }),
            );
        }

        if let Some(successor) = departure
            .successor
            .as_ref()
            .and_then(|id| meeting.participant(id))
        {
            out.broadcast(
                &recipients,
                ServerMessage::HostLeft(HostLeft {
                    old_host_name: leaver.name.clone(),
                    new_host: NewHost {
                        participant_id: successor.id.clone(),
                        name: successor.name.clone(),
                    },
                    participants: meeting.participant_views(),
                    message: format!("{} left. {} is now the host.", leaver.name, successor.name),
                }),
            );
            out.send(
                &successor.id,
                ServerMessage::MadeHost(MadeHost {
                    meeting_id: meeting.id().clone(),
                    message: "You are now the host of this meeting".to_string(),
                }),
            );
        }

        out.broadcast(
            &recipients,
            ServerMessage::ParticipantLeft(ParticipantLeft {
                participant_id: leaver.id.clone(),
                participant_name: leaver.name.clone(),
                reason,
                participants: meeting.participant_views(),
            }),
        );
    }

    fn set_hand(&mut self, conn: &ConnectionId, raised: bool, out: &mut Outbox) -> Result<(), RelayError> {
        let meeting_id = self.registry.meeting_of(conn)?;
        if !self.registry.set_hand_raised(&meeting_id, conn, raised)? {
            return Ok(());
        }
        let who = ParticipantRef {
            participant_id: conn.clone(),
        };
        out.broadcast(
            &self.room(&meeting_id)?.connection_ids(),
            if raised {
                ServerMessage::HandRaised(who)
            } else {
                ServerMessage::HandLowered(who)
            },
        );
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(
        &mut self,
        conn: &ConnectionId,
        message: ClientMessage,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<(), RelayError> {
        match message {
            ClientMessage::JoinAsHost(join) => {
                let already_member = self
                    .registry
                    .membership(conn)
                    .is_some_and(|m| m.meeting_id == join.meeting_id);
                let meeting = if already_member {
                    self.room(&join.meeting_id)?
                } else {
                    self.registry.create_meeting(
                        join.meeting_id,
                        conn.clone(),
                        &join.host_name,
                        join.meeting_name.as_deref(),
                        now,
                    )?
                };
                out.send(
                    conn,
                    ServerMessage::JoinedMeeting(Box::new(
                        meeting.snapshot_for(conn, &self.settings.transport),
                    )),
                );
            }

            ClientMessage::JoinMeeting(join) => {
                let outcome = self.registry.join(
                    &join.meeting_id,
                    conn,
                    &join.participant_name,
                    false,
                    now,
                )?;
                let meeting = self.room(&join.meeting_id)?;
                out.send(
                    conn,
                    ServerMessage::JoinedMeeting(Box::new(
                        meeting.snapshot_for(conn, &self.settings.transport),
                    )),
                );
                if !outcome.rejoined {
                    out.broadcast_except(
                        &meeting.connection_ids(),
                        conn,
                        ServerMessage::ParticipantJoined(ParticipantJoined {
                            participant: meeting.view_of(&outcome.participant),
                            participants: meeting.participant_views(),
                        }),
                    );
                }
            }

            ClientMessage::LeaveMeeting => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let departure = self.registry.leave(&meeting_id, conn)?;
                let reason = if departure.participant.is_host {
                    LeaveReason::HostLeft
                } else {
                    LeaveReason::Left
                };
                self.announce_departure(out, &departure, reason, false);
            }

            ClientMessage::HostLeaveMeeting(target) => {
                let meeting_id = self.claimed_meeting(conn, &target.meeting_id)?;
                self.room(&meeting_id)?
                    .participant(conn)
                    .filter(|p| p.is_host)
                    .ok_or_else(|| {
                        RelayError::Forbidden("Only host can leave as host".to_string())
                    })?;
                let departure = self.registry.leave(&meeting_id, conn)?;
                self.announce_departure(out, &departure, LeaveReason::HostLeft, false);
            }

            ClientMessage::EndMeetingForAll(end) => {
                let meeting_id = self.claimed_meeting(conn, &end.meeting_id)?;
                let meeting = self.registry.end_for_all(&meeting_id, conn)?;
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::MeetingEnded(MeetingEnded {
                        meeting_id: meeting.id().clone(),
                        reason: end.reason.unwrap_or_else(|| HOST_ENDED_REASON.to_string()),
                        host_name: meeting.host_name().to_string(),
                        message: "The host has ended the meeting for everyone".to_string(),
                    }),
                );
            }

            ClientMessage::ToggleMeetingLock(toggle) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry.lock(&meeting_id, conn, toggle.is_locked)?;
                let meeting = self.room(&meeting_id)?;
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::MeetingLockChanged(MeetingLockChanged {
                        is_locked: toggle.is_locked,
                        changed_by: self.name_of(&meeting_id, conn),
                    }),
                );
            }

            ClientMessage::UpdateMeetingPermissions(update) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let permissions =
                    self.registry
                        .update_permissions(&meeting_id, conn, &update.permissions)?;
                let meeting = self.room(&meeting_id)?;
                let changed_by = self.name_of(&meeting_id, conn);
                let recipients = meeting.connection_ids();
                out.broadcast(
                    &recipients,
                    ServerMessage::MeetingPermissionsUpdated(MeetingPermissionsUpdated {
                        permissions,
                        changed_by: changed_by.clone(),
                        participants: meeting.participant_views(),
                    }),
                );
                if let Some(allow_rename) = update.permissions.allow_rename {
                    out.broadcast(
                        &recipients,
                        ServerMessage::RenamePermissionUpdated(RenamePermissionUpdated {
                            allow_rename,
                            changed_by,
                        }),
                    );
                }
            }

            ClientMessage::ChangeMeetingName(change) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let rename = self.registry.rename(&meeting_id, conn, &change.new_name)?;
                let meeting = self.room(&meeting_id)?;
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::MeetingNameChanged(MeetingNameChanged {
                        old_name: rename.old_name,
                        new_name: rename.new_name,
                        changed_by: self.name_of(&meeting_id, conn),
                    }),
                );
            }

            ClientMessage::SpotlightParticipant(target) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry.spotlight(&meeting_id, conn, &target.target_id)?;
                let meeting = self.room(&meeting_id)?;
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::ParticipantSpotlighted(ParticipantSpotlighted {
                        participant_id: target.target_id,
                        spotlighted_by: self.name_of(&meeting_id, conn),
                        participants: meeting.participant_views(),
                    }),
                );
            }

            ClientMessage::RemoveSpotlight => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry.remove_spotlight(&meeting_id, conn)?;
                let meeting = self.room(&meeting_id)?;
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::SpotlightRemoved(SpotlightRemoved {
                        removed_by: self.name_of(&meeting_id, conn),
                        participants: meeting.participant_views(),
                    }),
                );
            }

            ClientMessage::MuteParticipant(mute) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry
                    .mute(&meeting_id, conn, &mute.target_id, mute.muted)?;
                let meeting = self.room(&meeting_id)?;
                let muted_by = self.name_of(&meeting_id, conn);
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::ParticipantMuted(ParticipantMuted {
                        participant_id: mute.target_id.clone(),
                        muted: mute.muted,
                        muted_by: muted_by.clone(),
                        participants: meeting.participant_views(),
                    }),
                );
                out.send(
                    &mute.target_id,
                    ServerMessage::ForceMute(ForceMute {
                        muted: mute.muted,
                        muted_by,
                    }),
                );
            }

            ClientMessage::MakeCohost(target) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry
                    .make_co_host(&meeting_id, conn, &target.target_id)?;
                let meeting = self.room(&meeting_id)?;
                let assigned_by = self.name_of(&meeting_id, conn);
                out.broadcast(
                    &meeting.connection_ids(),
                    ServerMessage::CohostAssigned(CohostAssigned {
                        participant_id: target.target_id.clone(),
                        assigned_by: assigned_by.clone(),
                        participants: meeting.participant_views(),
                    }),
                );
                out.send(
                    &target.target_id,
                    ServerMessage::MadeCohost(MadeCohost {
                        meeting_id,
                        assigned_by,
                    }),
                );
            }

            ClientMessage::KickParticipant(target) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let kicked_by = self.name_of(&meeting_id, conn);
                let departure = self.registry.kick(&meeting_id, conn, &target.target_id)?;
                out.send(
                    &target.target_id,
                    ServerMessage::KickedFromMeeting(KickedFromMeeting {
                        meeting_id: meeting_id.clone(),
                        kicked_by: kicked_by.clone(),
                        message: format!("You have been removed from the meeting by {kicked_by}"),
                    }),
                );
                if let Some(meeting) = self.registry.meeting(&meeting_id) {
                    out.broadcast(
                        &meeting.connection_ids(),
                        ServerMessage::ParticipantKicked(ParticipantKicked {
                            participant_id: departure.participant.id,
                            participant_name: departure.participant.name,
                            kicked_by,
                            participants: meeting.participant_views(),
                        }),
                    );
                }
            }

            ClientMessage::ToggleMic(toggle) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry.set_audio(&meeting_id, conn, toggle.is_muted)?;
                out.broadcast_except(
                    &self.room(&meeting_id)?.connection_ids(),
                    conn,
                    ServerMessage::ParticipantAudioChanged(ParticipantAudioChanged {
                        participant_id: conn.clone(),
                        is_muted: toggle.is_muted,
                    }),
                );
            }

            ClientMessage::ToggleCamera(toggle) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry
                    .set_video(&meeting_id, conn, toggle.is_camera_off)?;
                out.broadcast_except(
                    &self.room(&meeting_id)?.connection_ids(),
                    conn,
                    ServerMessage::ParticipantVideoChanged(ParticipantVideoChanged {
                        participant_id: conn.clone(),
                        is_camera_off: toggle.is_camera_off,
                    }),
                );
            }

            ClientMessage::StartScreenShare(share) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry
                    .start_screen_share(&meeting_id, conn, share.stream_id.clone())?;
                out.broadcast_except(
                    &self.room(&meeting_id)?.connection_ids(),
                    conn,
                    ServerMessage::ScreenShareStarted(ScreenShareStarted {
                        participant_id: conn.clone(),
                        stream_id: share.stream_id,
                    }),
                );
            }

            ClientMessage::StopScreenShare => {
                let meeting_id = self.registry.meeting_of(conn)?;
                if self.registry.stop_screen_share(&meeting_id, conn)? {
                    out.broadcast_except(
                        &self.room(&meeting_id)?.connection_ids(),
                        conn,
                        ServerMessage::ScreenShareStopped(ParticipantRef {
                            participant_id: conn.clone(),
                        }),
                    );
                }
            }

            ClientMessage::RaiseHand => self.set_hand(conn, true, out)?,

            ClientMessage::LowerHand => self.set_hand(conn, false, out)?,

            ClientMessage::ParticipantReady => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let peers = self.registry.set_ready(&meeting_id, conn)?;
                for peer in &peers {
                    out.send(
                        conn,
                        ServerMessage::InitiateConnection(InitiateConnection {
                            target_id: peer.clone(),
                            should_create_offer: true,
                            transport_config: self.settings.transport.clone(),
                        }),
                    );
                    out.send(
                        peer,
                        ServerMessage::InitiateConnection(InitiateConnection {
                            target_id: conn.clone(),
                            should_create_offer: false,
                            transport_config: self.settings.transport.clone(),
                        }),
                    );
                }
            }

            ClientMessage::ConnectionStateChange(change) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                let attempts = self.registry.record_connection_state(
                    &meeting_id,
                    conn,
                    &change.target_id,
                    change.state,
                )?;
                debug!(
                    target: "relay.actor.relay",
                    connection_id = %conn,
                    peer = %change.target_id,
                    state = change.state.as_str(),
                    failures = attempts.failures,
                    "Peer transport state reported"
                );
            }

            ClientMessage::RestartConnection(target) => {
                self.peer_meeting(conn, &target.target_id)?;
                out.send(
                    &target.target_id,
                    ServerMessage::RestartConnection(RestartRequest {
                        sender: conn.clone(),
                    }),
                );
            }

            ClientMessage::NetworkQuality(quality) => {
                let meeting_id = self.registry.meeting_of(conn)?;
                self.registry
                    .record_network_quality(&meeting_id, conn, quality.score)?;
            }

            ClientMessage::Heartbeat => {
                self.registry.record_heartbeat(conn, now);
            }

            ClientMessage::Offer(description) => {
                self.peer_meeting(conn, &description.target)?;
                out.send(
                    &description.target,
                    ServerMessage::Offer(InboundDescription {
                        sender: conn.clone(),
                        sdp: description.sdp,
                        ice_restart: description.ice_restart,
                    }),
                );
            }

            ClientMessage::Answer(description) => {
                self.peer_meeting(conn, &description.target)?;
                out.send(
                    &description.target,
                    ServerMessage::Answer(InboundDescription {
                        sender: conn.clone(),
                        sdp: description.sdp,
                        ice_restart: description.ice_restart,
                    }),
                );
            }

            ClientMessage::IceCandidate(candidate) => {
                self.peer_meeting(conn, &candidate.target)?;
                out.send(
                    &candidate.target,
                    ServerMessage::IceCandidate(InboundCandidate {
                        sender: conn.clone(),
                        candidate: candidate.candidate,
                    }),
                );
            }
        }
        Ok(())
    }
}

fn error_reply(event: &str, join_target: Option<MeetingId>, err: &RelayError) -> ServerMessage {
    match (join_target, err) {
        (Some(meeting_id), RelayError::Locked(_)) => ServerMessage::MeetingLocked(MeetingLocked {
            meeting_id,
            message: LOCKED_MESSAGE.to_string(),
        }),
        (Some(_), _) => ServerMessage::MeetingError(MeetingError {
            message: err.client_message(),
        }),
        (None, _) => ServerMessage::ActionError(ActionError {
            message: err.client_message(),
            event: Some(event.to_string()),
        }),
    }
}

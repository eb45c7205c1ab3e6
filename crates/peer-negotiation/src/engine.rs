//! Sans-IO perfect negotiation.
//!
//! The engine keeps one [`PeerLink`] per remote participant and turns
//! everything that happens to it (server messages, backend completions,
//! transport state changes, user media toggles) into an ordered list of
//! [`Action`]s. Callers carry the actions out in order and report
//! completions back with the link generation they were issued for.
//!
//! Glare handling follows the polite/impolite split from [`Role`]: when
//! offers cross, the polite side rolls back and answers, the impolite side
//! drops the incoming offer and waits for the answer to its own.

use std::collections::BTreeMap;

use common::types::{ConnectionId, MeetingId};
use signaling_protocol::messages::{
    ConnectionStateChange, OutboundCandidate, OutboundDescription, TargetParticipant, ToggleCamera,
    ToggleMic,
};
use signaling_protocol::{ClientMessage, IceCandidate, ServerMessage, TransportConfig, TransportState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{Action, Command, EngineEvent, SdpKind};
use crate::config::NegotiationConfig;
use crate::error::NegotiationError;
use crate::link::{LinkPhase, OfferReason, PeerLink, SignalingState};
use crate::media::{AcquiredTracks, MediaSource, MediaStep, MediaTrackController, TrackChange, TrackId};
use crate::role::Role;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TimerKey {
    DisconnectGrace { peer: ConnectionId, generation: u64 },
}

impl TimerKey {
    fn peer(&self) -> &ConnectionId {
        match self {
            TimerKey::DisconnectGrace { peer, .. } => peer,
        }
    }
}

/// Negotiation state for every link of one local participant.
#[derive(Debug)]
pub struct NegotiationEngine {
    local_id: ConnectionId,
    config: NegotiationConfig,
    transport: TransportConfig,
    links: BTreeMap<ConnectionId, PeerLink>,
    media: MediaTrackController,
    timers: Scheduler<TimerKey>,
    actions: Vec<Action>,
    next_generation: u64,
    meeting_id: Option<MeetingId>,
    ready_sent: bool,
    media_requested: bool,
    media_outstanding: usize,
}

impl NegotiationEngine {
    #[must_use]
    pub fn new(local_id: ConnectionId, config: NegotiationConfig) -> Self {
        Self {
            local_id,
            media: MediaTrackController::new(config.track_policy),
            config,
            transport: TransportConfig::default(),
            links: BTreeMap::new(),
            timers: Scheduler::new(),
            actions: Vec::new(),
            next_generation: 0,
            meeting_id: None,
            ready_sent: false,
            media_requested: false,
            media_outstanding: 0,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> &ConnectionId {
        &self.local_id
    }

    #[must_use]
    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    #[must_use]
    pub fn meeting_id(&self) -> Option<&MeetingId> {
        self.meeting_id.as_ref()
    }

    #[must_use]
    pub fn link(&self, peer: &ConnectionId) -> Option<&PeerLink> {
        self.links.get(peer)
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn media(&self) -> &MediaTrackController {
        &self.media
    }

    /// When [`NegotiationEngine::poll_timers`] next has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    #[must_use]
    pub fn has_pending_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Take every queued action, oldest first.
    pub fn drain_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn execute(&mut self, command: Command) {
        self.actions.push(Action::Execute(command));
    }

    fn send(&mut self, message: ClientMessage) {
        self.actions.push(Action::Send(message));
    }

    fn notify(&mut self, event: EngineEvent) {
        self.actions.push(Action::Notify(event));
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    /// Open microphone and camera. The engine announces readiness once
    /// both have been acquired or reported unavailable.
    pub fn start_local_media(&mut self) {
        if self.media_requested {
            return;
        }
        self.media_requested = true;
        let steps = self.media.request_local_media();
        self.media_outstanding = steps
            .iter()
            .filter(|s| matches!(s, MediaStep::Acquire(_)))
            .count();
        self.apply_media(steps);
    }

    pub fn media_acquired(&mut self, source: MediaSource, tracks: AcquiredTracks) {
        let steps = self.media.media_acquired(source, tracks);
        self.apply_media(steps);
        self.source_resolved(source);
    }

    pub fn media_unavailable(&mut self, source: MediaSource, reason: &str) {
        warn!(
            target: "negotiation.engine",
            source = ?source,
            reason,
            "Media source unavailable"
        );
        self.media.media_unavailable(source);
        self.notify(EngineEvent::MediaUnavailable {
            source,
            reason: reason.to_string(),
        });
        self.source_resolved(source);
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        let steps = self.media.set_audio_enabled(enabled);
        self.apply_media(steps);
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        let steps = self.media.set_video_enabled(enabled);
        self.apply_media(steps);
    }

    pub fn start_screen_capture(&mut self, with_audio: bool) {
        let steps = self.media.start_screen_capture(with_audio);
        self.apply_media(steps);
    }

    pub fn stop_screen_capture(&mut self) {
        let steps = self.media.stop_screen_capture();
        self.apply_media(steps);
    }

    /// A capture track was stopped from outside the application.
    pub fn capture_ended(&mut self, track: &TrackId) {
        info!(target: "negotiation.engine", track = %track, "Capture ended externally");
        let steps = self.media.capture_ended(track);
        self.apply_media(steps);
    }

    fn source_resolved(&mut self, source: MediaSource) {
        if matches!(source, MediaSource::Microphone | MediaSource::Camera) {
            self.media_outstanding = self.media_outstanding.saturating_sub(1);
        }
        self.maybe_send_ready();
    }

    fn maybe_send_ready(&mut self) {
        if self.meeting_id.is_some() && !self.ready_sent && self.media_outstanding == 0 {
            self.ready_sent = true;
            self.send(ClientMessage::ParticipantReady);
        }
    }

    fn apply_media(&mut self, steps: Vec<MediaStep>) {
        for step in steps {
            match step {
                MediaStep::Acquire(source) => self.execute(Command::Acquire(source)),
                MediaStep::SetEnabled { track, enabled } => {
                    self.execute(Command::SetTrackEnabled { track, enabled });
                }
                MediaStep::Stop(track) => self.execute(Command::StopTrack(track)),
                MediaStep::Links(change) => self.apply_track_change(&change),
                MediaStep::Notify(message) => {
                    if self.meeting_id.is_some() {
                        self.send(message);
                    }
                }
            }
        }
    }

    /// Apply a sender change to every link. Replacing the track on an
    /// existing sender never renegotiates.
    fn apply_track_change(&mut self, change: &TrackChange) {
        let peers: Vec<ConnectionId> = self.links.keys().cloned().collect();
        for peer in peers {
            let Some(link) = self.links.get_mut(&peer) else {
                continue;
            };
            let generation = link.generation;
            let (command, renegotiate) = match change {
                TrackChange::Replace { slot, track } => match (link.senders.contains(slot), track) {
                    (true, track) => (
                        Some(Command::ReplaceTrack {
                            peer: peer.clone(),
                            generation,
                            slot: *slot,
                            track: track.clone(),
                        }),
                        false,
                    ),
                    (false, Some(track)) => {
                        link.senders.insert(*slot);
                        (
                            Some(Command::AddTrack {
                                peer: peer.clone(),
                                generation,
                                slot: *slot,
                                track: track.clone(),
                            }),
                            true,
                        )
                    }
                    (false, None) => (None, false),
                },
                TrackChange::Add { slot, track } => {
                    if link.senders.insert(*slot) {
                        (
                            Some(Command::AddTrack {
                                peer: peer.clone(),
                                generation,
                                slot: *slot,
                                track: track.clone(),
                            }),
                            true,
                        )
                    } else {
                        (
                            Some(Command::ReplaceTrack {
                                peer: peer.clone(),
                                generation,
                                slot: *slot,
                                track: Some(track.clone()),
                            }),
                            false,
                        )
                    }
                }
                TrackChange::Remove { slot } => {
                    if link.senders.remove(slot) {
                        (
                            Some(Command::RemoveTrack {
                                peer: peer.clone(),
                                generation,
                                slot: *slot,
                            }),
                            true,
                        )
                    } else {
                        (None, false)
                    }
                }
            };
            if let Some(command) = command {
                self.execute(command);
            }
            if renegotiate {
                self.request_offer(&peer, OfferReason::TrackChange);
            }
        }
    }

    // ------------------------------------------------------------------
    // Link lifecycle
    // ------------------------------------------------------------------

    /// Open a link to `peer`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// `SelfLink` when `peer` is the local participant.
    pub fn create_link(&mut self, peer: &ConnectionId, should_offer: bool) -> Result<(), NegotiationError> {
        if *peer == self.local_id {
            return Err(NegotiationError::SelfLink(peer.clone()));
        }
        self.open_link(peer.clone(), should_offer, None);
        Ok(())
    }

    /// Close the link to `peer`, if there is one.
    pub fn close_link(&mut self, peer: &ConnectionId) {
        self.discard_link(peer);
    }

    /// Ask for a fresh offer on an existing link.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` when no link exists.
    pub fn negotiation_needed(&mut self, peer: &ConnectionId) -> Result<(), NegotiationError> {
        if !self.links.contains_key(peer) {
            return Err(NegotiationError::UnknownPeer(peer.clone()));
        }
        self.request_offer(peer, OfferReason::TrackChange);
        Ok(())
    }

    /// `carry` keeps restart accounting across a rebuild of the same pair.
    fn open_link(&mut self, peer: ConnectionId, should_offer: bool, carry: Option<(u32, bool)>) {
        let replaced = self.discard_link(&peer);

        self.next_generation += 1;
        let generation = self.next_generation;
        let mut link = PeerLink::new(&self.local_id, peer.clone(), generation);
        if let Some((ice_restarts, escalated)) = carry {
            link.ice_restarts = ice_restarts;
            link.escalated = escalated;
        }

        self.execute(Command::CreateLink {
            peer: peer.clone(),
            generation,
            transport: self.transport.clone(),
        });
        for (slot, track) in self.media.outgoing_tracks() {
            link.senders.insert(slot);
            self.execute(Command::AddTrack {
                peer: peer.clone(),
                generation,
                slot,
                track,
            });
        }

        info!(
            target: "negotiation.engine",
            peer = %peer,
            generation,
            polite = link.role.is_polite(),
            should_offer,
            replaced,
            "Peer link created"
        );
        self.links.insert(peer.clone(), link);
        self.notify(EngineEvent::LinkCreated { peer: peer.clone() });

        if should_offer {
            self.request_offer(&peer, OfferReason::Initial);
        }
    }

    /// Returns true if a link existed.
    fn discard_link(&mut self, peer: &ConnectionId) -> bool {
        let Some(link) = self.links.remove(peer) else {
            return false;
        };
        self.timers.retain(|key| key.peer() != peer);
        self.execute(Command::CloseLink {
            peer: peer.clone(),
            generation: link.generation,
        });
        debug!(
            target: "negotiation.engine",
            peer = %peer,
            generation = link.generation,
            dropped_candidates = link.pending_candidates.len(),
            "Peer link closed"
        );
        self.notify(EngineEvent::LinkClosed { peer: peer.clone() });
        true
    }

    fn current_link_mut(&mut self, peer: &ConnectionId, generation: u64) -> Option<&mut PeerLink> {
        match self.links.get_mut(peer) {
            Some(link) if link.generation == generation => Some(link),
            Some(link) => {
                debug!(
                    target: "negotiation.engine",
                    peer = %peer,
                    current = link.generation,
                    stale = generation,
                    "Discarding completion for an old link"
                );
                None
            }
            None => None,
        }
    }

    fn enter_phase(&mut self, peer: &ConnectionId, phase: LinkPhase) {
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        if link.phase == phase {
            return;
        }
        debug!(
            target: "negotiation.engine",
            peer = %peer,
            from = ?link.phase,
            to = ?phase,
            "Link phase changed"
        );
        link.phase = phase;
        self.notify(EngineEvent::LinkPhaseChanged {
            peer: peer.clone(),
            phase,
        });
    }

    /// A live transport stays `Connected` while descriptions are swapped.
    fn begin_negotiating(&mut self, peer: &ConnectionId) {
        if self
            .links
            .get(peer)
            .is_some_and(|l| l.phase != LinkPhase::Connected)
        {
            self.enter_phase(peer, LinkPhase::Negotiating);
        }
    }

    // ------------------------------------------------------------------
    // Offer / answer
    // ------------------------------------------------------------------

    fn request_offer(&mut self, peer: &ConnectionId, reason: OfferReason) {
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        if !link.can_offer_now() {
            link.queue(reason);
            debug!(
                target: "negotiation.engine",
                peer = %peer,
                reason = ?reason,
                "Negotiation deferred until stable"
            );
            return;
        }
        link.making_offer = true;
        link.in_flight = Some(reason);
        let generation = link.generation;
        self.begin_negotiating(peer);
        self.execute(Command::CreateOffer {
            peer: peer.clone(),
            generation,
            ice_restart: reason == OfferReason::IceRestart,
        });
    }

    /// The backend created and applied a local offer.
    pub fn offer_created(&mut self, peer: &ConnectionId, generation: u64, sdp: String) {
        let Some(link) = self.current_link_mut(peer, generation) else {
            return;
        };
        if !link.making_offer {
            debug!(
                target: "negotiation.engine",
                peer = %peer,
                "Dropping offer made stale by rollback"
            );
            return;
        }
        link.making_offer = false;
        link.signaling_state = SignalingState::HaveLocalOffer;
        link.offers_sent += 1;
        let ice_restart = link.in_flight == Some(OfferReason::IceRestart);
        self.send(ClientMessage::Offer(OutboundDescription {
            target: peer.clone(),
            sdp,
            ice_restart,
        }));
    }

    /// The backend created and applied a local answer.
    pub fn answer_created(&mut self, peer: &ConnectionId, generation: u64, sdp: String) {
        let Some(link) = self.current_link_mut(peer, generation) else {
            return;
        };
        if link.signaling_state != SignalingState::HaveRemoteOffer {
            debug!(
                target: "negotiation.engine",
                peer = %peer,
                state = ?link.signaling_state,
                "Dropping answer with no remote offer"
            );
            return;
        }
        link.signaling_state = SignalingState::Stable;
        self.send(ClientMessage::Answer(OutboundDescription {
            target: peer.clone(),
            sdp,
            ice_restart: false,
        }));
        self.settle(peer);
    }

    /// A remote description finished applying. Buffered candidates are
    /// replayed now, in arrival order, exactly once.
    ///
    /// A completion whose `kind` is not the description being applied is
    /// dropped.
    pub fn remote_description_applied(&mut self, peer: &ConnectionId, generation: u64, kind: SdpKind) {
        let Some(link) = self.current_link_mut(peer, generation) else {
            return;
        };
        if link.applying != Some(kind) {
            debug!(
                target: "negotiation.engine",
                peer = %peer,
                completed = ?kind,
                applying = ?link.applying,
                "Dropping unmatched description completion"
            );
            return;
        }
        link.applying = None;
        link.is_setting_remote_description = false;
        link.has_remote_description = true;
        link.signaling_state = match kind {
            SdpKind::Offer => SignalingState::HaveRemoteOffer,
            SdpKind::Answer => SignalingState::Stable,
        };
        // Candidates behind a held offer wait for that offer.
        let buffered = if link.held_offer.is_some() {
            Vec::new()
        } else {
            std::mem::take(&mut link.pending_candidates)
        };

        if !buffered.is_empty() {
            debug!(
                target: "negotiation.engine",
                peer = %peer,
                count = buffered.len(),
                "Replaying buffered candidates"
            );
        }
        for candidate in buffered {
            self.execute(Command::AddCandidate {
                peer: peer.clone(),
                generation,
                candidate,
            });
        }

        match kind {
            SdpKind::Offer => self.execute(Command::CreateAnswer {
                peer: peer.clone(),
                generation,
            }),
            SdpKind::Answer => self.settle(peer),
        }
    }

    /// Back to stable: run whatever negotiation was deferred.
    fn settle(&mut self, peer: &ConnectionId) {
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        link.in_flight = None;
        if let Some(sdp) = link.held_offer.take() {
            self.on_remote_offer(peer, &sdp);
            return;
        }
        let queued = link.queued.take();
        if link.phase == LinkPhase::Negotiating {
            self.enter_phase(peer, LinkPhase::Stable);
        }
        if let Some(reason) = queued {
            self.request_offer(peer, reason);
        }
    }

    fn on_remote_offer(&mut self, sender: &ConnectionId, sdp: &str) {
        if *sender == self.local_id {
            return;
        }
        if !self.links.contains_key(sender) {
            self.open_link(sender.clone(), false, None);
        }
        let Some(link) = self.links.get_mut(sender) else {
            return;
        };

        if link.is_setting_remote_description {
            let replaced = link.held_offer.replace(sdp.to_string()).is_some();
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                applying = ?link.applying,
                replaced,
                "Holding offer until the current description is applied"
            );
            return;
        }

        let collision = link.offer_collision();
        link.ignore_offer = collision && link.role == Role::Impolite;
        if link.ignore_offer {
            link.ignored_offers += 1;
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                "Ignoring colliding offer; ours wins"
            );
            return;
        }

        let generation = link.generation;
        let rollback = link.making_offer || link.signaling_state != SignalingState::Stable;
        if rollback {
            if let Some(reason) = link.in_flight.take().filter(|r| *r != OfferReason::Initial) {
                link.queue(reason);
            }
            link.making_offer = false;
            link.signaling_state = SignalingState::Stable;
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                "Offer collision; rolling back ours"
            );
        }
        link.is_setting_remote_description = true;
        link.applying = Some(SdpKind::Offer);

        self.begin_negotiating(sender);
        if rollback {
            self.execute(Command::Rollback {
                peer: sender.clone(),
                generation,
            });
        }
        self.execute(Command::ApplyRemoteDescription {
            peer: sender.clone(),
            generation,
            kind: SdpKind::Offer,
            sdp: sdp.to_string(),
        });
    }

    fn on_remote_answer(&mut self, sender: &ConnectionId, sdp: &str) {
        let Some(link) = self.links.get_mut(sender) else {
            debug!(target: "negotiation.engine", peer = %sender, "Answer for unknown peer");
            return;
        };
        if link.signaling_state != SignalingState::HaveLocalOffer
            || link.is_setting_remote_description
        {
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                state = ?link.signaling_state,
                "Ignoring unexpected answer"
            );
            return;
        }
        link.ignore_offer = false;
        link.is_setting_remote_description = true;
        link.applying = Some(SdpKind::Answer);
        let generation = link.generation;
        self.execute(Command::ApplyRemoteDescription {
            peer: sender.clone(),
            generation,
            kind: SdpKind::Answer,
            sdp: sdp.to_string(),
        });
    }

    fn on_remote_candidate(&mut self, sender: &ConnectionId, candidate: IceCandidate) {
        let Some(link) = self.links.get_mut(sender) else {
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                "Dropping candidate for unknown peer"
            );
            return;
        };
        if link.must_buffer_candidates() {
            link.pending_candidates.push(candidate);
            debug!(
                target: "negotiation.engine",
                peer = %sender,
                buffered = link.pending_candidates.len(),
                "Buffered remote candidate"
            );
            return;
        }
        let generation = link.generation;
        self.execute(Command::AddCandidate {
            peer: sender.clone(),
            generation,
            candidate,
        });
    }

    /// The backend gathered a local candidate.
    pub fn local_candidate(&mut self, peer: &ConnectionId, generation: u64, candidate: IceCandidate) {
        if self.current_link_mut(peer, generation).is_none() {
            return;
        }
        self.send(ClientMessage::IceCandidate(OutboundCandidate {
            target: peer.clone(),
            candidate,
        }));
    }

    /// A backend operation failed. Failures on the negotiation path count
    /// as a transport failure; the rest are logged.
    pub fn operation_failed(&mut self, peer: &ConnectionId, generation: u64, operation: &str, error: &str) {
        let Some(link) = self.current_link_mut(peer, generation) else {
            return;
        };
        warn!(
            target: "negotiation.engine",
            peer = %peer,
            operation,
            error,
            "Link operation failed"
        );
        match operation {
            "create-offer" | "create-answer" | "apply-remote-description" | "rollback"
            | "create-link" => {
                link.making_offer = false;
                link.is_setting_remote_description = false;
                link.applying = None;
                link.in_flight = None;
                link.signaling_state = SignalingState::Stable;
                let held = link.held_offer.take();
                self.enter_phase(peer, LinkPhase::Failed);
                if let Some(sdp) = held {
                    self.on_remote_offer(peer, &sdp);
                }
                self.restart(peer);
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Transport health
    // ------------------------------------------------------------------

    pub fn transport_state_changed(
        &mut self,
        peer: &ConnectionId,
        generation: u64,
        state: TransportState,
        now: Instant,
    ) {
        let Some(link) = self.current_link_mut(peer, generation) else {
            return;
        };
        if link.transport_state == state {
            return;
        }
        link.transport_state = state;
        if state == TransportState::Connected {
            link.ice_restarts = 0;
            link.escalated = false;
        }

        self.send(ClientMessage::ConnectionStateChange(ConnectionStateChange {
            target_id: peer.clone(),
            state,
        }));

        let key = TimerKey::DisconnectGrace {
            peer: peer.clone(),
            generation,
        };
        match state {
            TransportState::Connected => {
                self.timers.cancel(&key);
                self.enter_phase(peer, LinkPhase::Connected);
            }
            TransportState::Disconnected => {
                self.timers.schedule(now + self.config.disconnect_grace, key);
                self.enter_phase(peer, LinkPhase::Disconnected);
            }
            TransportState::Failed => {
                self.timers.cancel(&key);
                self.enter_phase(peer, LinkPhase::Failed);
                self.restart(peer);
            }
            TransportState::New | TransportState::Checking | TransportState::Closed => {
                self.timers.cancel(&key);
            }
        }
    }

    /// Fire due timers.
    pub fn poll_timers(&mut self, now: Instant) {
        for key in self.timers.pop_due(now) {
            match key {
                TimerKey::DisconnectGrace { peer, generation } => {
                    let still_down = self.links.get(&peer).is_some_and(|l| {
                        l.generation == generation
                            && l.transport_state == TransportState::Disconnected
                    });
                    if still_down {
                        info!(
                            target: "negotiation.engine",
                            peer = %peer,
                            "Still disconnected after grace period"
                        );
                        self.restart(&peer);
                    }
                }
            }
        }
    }

    /// ICE restart, then one rebuild of the link, then give up.
    fn restart(&mut self, peer: &ConnectionId) {
        let max = self.config.max_ice_restarts;
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        if link.ice_restarts < max {
            link.ice_restarts += 1;
            info!(
                target: "negotiation.engine",
                peer = %peer,
                attempt = link.ice_restarts,
                max,
                "Restarting ICE"
            );
            self.request_offer(peer, OfferReason::IceRestart);
        } else if !link.escalated {
            let carry = (link.ice_restarts, true);
            warn!(
                target: "negotiation.engine",
                peer = %peer,
                "ICE restarts exhausted; rebuilding link"
            );
            self.send(ClientMessage::RestartConnection(TargetParticipant {
                target_id: peer.clone(),
            }));
            self.open_link(peer.clone(), false, Some(carry));
        } else {
            warn!(
                target: "negotiation.engine",
                peer = %peer,
                "Link failed after rebuild"
            );
            self.enter_phase(peer, LinkPhase::Failed);
            self.notify(EngineEvent::LinkDegraded { peer: peer.clone() });
        }
    }

    // ------------------------------------------------------------------
    // Server messages
    // ------------------------------------------------------------------

    pub fn handle_server_message(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::JoinedMeeting(snapshot) => {
                self.transport = snapshot.transport_config.clone();
                self.meeting_id = Some(snapshot.meeting_id.clone());
                if !self.media.audio_enabled() {
                    self.send(ClientMessage::ToggleMic(ToggleMic { is_muted: true }));
                }
                if !self.media.video_enabled() {
                    self.send(ClientMessage::ToggleCamera(ToggleCamera {
                        is_camera_off: true,
                    }));
                }
                self.maybe_send_ready();
            }
            ServerMessage::InitiateConnection(init) => {
                self.transport = init.transport_config.clone();
                if let Err(e) = self.create_link(&init.target_id, init.should_create_offer) {
                    warn!(target: "negotiation.engine", error = %e, "Ignoring initiate-connection");
                }
            }
            ServerMessage::Offer(description) => {
                self.on_remote_offer(&description.sender, &description.sdp);
            }
            ServerMessage::Answer(description) => {
                self.on_remote_answer(&description.sender, &description.sdp);
            }
            ServerMessage::IceCandidate(candidate) => {
                self.on_remote_candidate(&candidate.sender, candidate.candidate.clone());
            }
            ServerMessage::RestartConnection(request) => {
                if request.sender != self.local_id {
                    info!(
                        target: "negotiation.engine",
                        peer = %request.sender,
                        "Peer asked for a fresh link"
                    );
                    self.open_link(request.sender.clone(), true, None);
                }
            }
            ServerMessage::ParticipantLeft(left) => self.close_link(&left.participant_id),
            ServerMessage::PeerDisconnected(gone) => self.close_link(&gone.participant_id),
            ServerMessage::ParticipantKicked(kicked) => {
                if kicked.participant_id == self.local_id {
                    self.end_session("kicked");
                } else {
                    self.close_link(&kicked.participant_id);
                }
            }
            ServerMessage::MeetingEnded(ended) => self.end_session(&ended.reason),
            ServerMessage::KickedFromMeeting(_) => self.end_session("kicked"),
            ServerMessage::ConnectionHealthCheck(_) => self.send(ClientMessage::Heartbeat),
            _ => {}
        }
    }

    /// Leave the meeting: tell the relay, then tear everything down.
    pub fn leave(&mut self) {
        if self.meeting_id.is_some() {
            self.send(ClientMessage::LeaveMeeting);
        }
        self.end_session("left");
    }

    /// Close every link and release every device.
    fn end_session(&mut self, reason: &str) {
        let peers: Vec<ConnectionId> = self.links.keys().cloned().collect();
        for peer in &peers {
            self.discard_link(peer);
        }
        self.timers.clear();
        let steps = self.media.release_all();
        self.apply_media(steps);
        self.meeting_id = None;
        self.ready_sent = false;
        self.media_requested = false;
        self.media_outstanding = 0;
        info!(
            target: "negotiation.engine",
            reason,
            closed_links = peers.len(),
            "Session ended"
        );
        self.notify(EngineEvent::SessionEnded {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use signaling_protocol::messages::{
        HealthCheck, InboundCandidate, InboundDescription, InitiateConnection, KickedFromMeeting,
        RestartRequest,
    };
    use std::time::Duration;

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::from(raw)
    }

    fn engine(local: &str) -> NegotiationEngine {
        NegotiationEngine::new(id(local), NegotiationConfig::default())
    }

    fn candidate(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    /// What one engine did while its backend completed everything at once.
    #[derive(Default)]
    struct Trace {
        sent: Vec<ClientMessage>,
        commands: Vec<Command>,
        events: Vec<EngineEvent>,
    }

    impl Trace {
        fn command_names(&self) -> Vec<&'static str> {
            self.commands.iter().map(Command::name).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.commands.iter().filter(|c| c.name() == name).count()
        }
    }

    fn run(engine: &mut NegotiationEngine) -> Trace {
        let mut trace = Trace::default();
        loop {
            let actions = engine.drain_actions();
            if actions.is_empty() {
                return trace;
            }
            for action in actions {
                match action {
                    Action::Execute(command) => {
                        match &command {
                            Command::CreateOffer { peer, generation, .. } => {
                                let sdp = format!("offer:{}", engine.local_id());
                                engine.offer_created(peer, *generation, sdp);
                            }
                            Command::CreateAnswer { peer, generation } => {
                                let sdp = format!("answer:{}", engine.local_id());
                                engine.answer_created(peer, *generation, sdp);
                            }
                            Command::ApplyRemoteDescription { peer, generation, kind, .. } => {
                                engine.remote_description_applied(peer, *generation, *kind);
                            }
                            _ => {}
                        }
                        trace.commands.push(command);
                    }
                    Action::Send(message) => trace.sent.push(message),
                    Action::Notify(event) => trace.events.push(event),
                }
            }
        }
    }

    /// Turn what `from` sent into what its targets receive.
    fn relay(from: &str, sent: &[ClientMessage]) -> Vec<ServerMessage> {
        sent.iter()
            .filter_map(|m| match m {
                ClientMessage::Offer(d) => Some(ServerMessage::Offer(InboundDescription {
                    sender: id(from),
                    sdp: d.sdp.clone(),
                    ice_restart: d.ice_restart,
                })),
                ClientMessage::Answer(d) => Some(ServerMessage::Answer(InboundDescription {
                    sender: id(from),
                    sdp: d.sdp.clone(),
                    ice_restart: d.ice_restart,
                })),
                ClientMessage::IceCandidate(c) => {
                    Some(ServerMessage::IceCandidate(InboundCandidate {
                        sender: id(from),
                        candidate: c.candidate.clone(),
                    }))
                }
                _ => None,
            })
            .collect()
    }

    fn deliver(engine: &mut NegotiationEngine, messages: &[ServerMessage]) {
        for message in messages {
            engine.handle_server_message(message);
        }
    }

    /// `a` offers to `b` and both reach stable.
    fn negotiated_pair(a: &str, b: &str) -> (NegotiationEngine, NegotiationEngine) {
        let mut left = engine(a);
        let mut right = engine(b);
        right.create_link(&id(a), false).unwrap();
        run(&mut right);
        left.create_link(&id(b), true).unwrap();
        let offer = run(&mut left);
        deliver(&mut right, &relay(a, &offer.sent));
        let answer = run(&mut right);
        deliver(&mut left, &relay(b, &answer.sent));
        run(&mut left);
        (left, right)
    }

    #[test]
    fn test_single_offerer_converges() {
        let (a, b) = negotiated_pair("a", "b");

        let link = a.link(&id("b")).unwrap();
        assert_eq!(link.signaling_state(), SignalingState::Stable);
        assert_eq!(link.phase(), LinkPhase::Stable);
        assert_eq!(link.offers_sent(), 1);
        assert_eq!(b.link(&id("a")).unwrap().signaling_state(), SignalingState::Stable);
    }

    #[test]
    fn test_glare_polite_side_yields() {
        let mut polite = engine("a");
        let mut impolite = engine("b");
        polite.create_link(&id("b"), true).unwrap();
        impolite.create_link(&id("a"), true).unwrap();
        let polite_offer = run(&mut polite);
        let impolite_offer = run(&mut impolite);
        assert_eq!(
            polite.link(&id("b")).unwrap().signaling_state(),
            SignalingState::HaveLocalOffer
        );

        deliver(&mut polite, &relay("b", &impolite_offer.sent));
        deliver(&mut impolite, &relay("a", &polite_offer.sent));

        let polite_answer = run(&mut polite);
        assert!(polite_answer.command_names().contains(&"rollback"));
        assert!(matches!(polite_answer.sent.as_slice(), [ClientMessage::Answer(_)]));

        let impolite_quiet = run(&mut impolite);
        assert!(impolite_quiet.sent.is_empty());
        assert!(impolite.link(&id("a")).unwrap().ignore_offer());
        assert_eq!(impolite.link(&id("a")).unwrap().ignored_offers(), 1);

        deliver(&mut impolite, &relay("a", &polite_answer.sent));
        run(&mut impolite);

        for (engine, peer) in [(&polite, "b"), (&impolite, "a")] {
            assert_eq!(engine.link_count(), 1);
            let link = engine.link(&id(peer)).unwrap();
            assert_eq!(link.signaling_state(), SignalingState::Stable);
            assert!(!link.making_offer());
            assert!(!link.ignore_offer());
        }
        // Only the impolite offer completed a round trip.
        assert_eq!(impolite.link(&id("a")).unwrap().offers_sent(), 1);
    }

    #[test]
    fn test_rolled_back_track_change_is_reoffered() {
        let (mut a, mut b) = negotiated_pair("a", "b");
        a.negotiation_needed(&id("b")).unwrap();
        b.negotiation_needed(&id("a")).unwrap();
        let a_offer = run(&mut a);
        let b_offer = run(&mut b);

        deliver(&mut a, &relay("b", &b_offer.sent));
        deliver(&mut b, &relay("a", &a_offer.sent));
        let a_out = run(&mut a);

        // Answer to b, then a fresh offer for the change that was rolled back.
        assert!(matches!(
            a_out.sent.as_slice(),
            [ClientMessage::Answer(_), ClientMessage::Offer(_)]
        ));
        assert_eq!(
            a.link(&id("b")).unwrap().signaling_state(),
            SignalingState::HaveLocalOffer
        );
    }

    #[test]
    fn test_stale_offer_after_rollback_is_dropped() {
        let mut a = engine("a");
        a.create_link(&id("b"), true).unwrap();
        let pending = a.drain_actions();
        let generation = a.link(&id("b")).unwrap().generation();
        assert!(pending
            .iter()
            .any(|x| matches!(x, Action::Execute(Command::CreateOffer { .. }))));

        // Peer's offer lands before ours is created.
        a.handle_server_message(&ServerMessage::Offer(InboundDescription {
            sender: id("b"),
            sdp: "offer:b".into(),
            ice_restart: false,
        }));
        a.offer_created(&id("b"), generation, "offer:a".into());

        let trace = run(&mut a);
        assert!(!trace.sent.iter().any(|m| matches!(m, ClientMessage::Offer(_))));
        assert_eq!(a.link(&id("b")).unwrap().offers_sent(), 0);
    }

    /// `a` and `b` renegotiate back to back: `late` offers, `early`
    /// answers, then `early` offers again. Returns `early`'s answer and its
    /// new offer, neither delivered yet.
    fn answer_then_offer(
        early: &mut NegotiationEngine,
        late: &mut NegotiationEngine,
    ) -> (Vec<ServerMessage>, Vec<ServerMessage>) {
        let early_id = early.local_id().as_str().to_string();
        let late_id = late.local_id().as_str().to_string();
        late.negotiation_needed(&id(&early_id)).unwrap();
        let late_offer = run(late);
        deliver(early, &relay(&late_id, &late_offer.sent));
        let answer = run(early);
        early.negotiation_needed(&id(&late_id)).unwrap();
        let offer = run(early);
        (relay(&early_id, &answer.sent), relay(&early_id, &offer.sent))
    }

    #[test]
    fn test_offer_during_answer_apply_is_held_on_impolite_side() {
        let (mut a, mut b) = negotiated_pair("a", "b");
        let (answer, offer) = answer_then_offer(&mut a, &mut b);

        deliver(&mut b, &answer);
        let applying = b.drain_actions();
        assert!(matches!(
            applying.as_slice(),
            [Action::Execute(Command::ApplyRemoteDescription { kind: SdpKind::Answer, .. })]
        ));
        let generation = b.link(&id("a")).unwrap().generation();

        deliver(&mut b, &offer);
        b.handle_server_message(&ServerMessage::IceCandidate(InboundCandidate {
            sender: id("a"),
            candidate: candidate("c1"),
        }));
        assert!(b.drain_actions().is_empty());
        let link = b.link(&id("a")).unwrap();
        assert!(link.has_held_offer());
        assert!(!link.ignore_offer());
        assert_eq!(link.ignored_offers(), 0);
        assert_eq!(link.pending_candidates().len(), 1);

        b.remote_description_applied(&id("a"), generation, SdpKind::Answer);
        let b_out = run(&mut b);
        assert_eq!(
            b_out.command_names(),
            vec!["apply-remote-description", "add-candidate", "create-answer"]
        );
        assert!(matches!(b_out.sent.as_slice(), [ClientMessage::Answer(_)]));

        deliver(&mut a, &relay("b", &b_out.sent));
        run(&mut a);
        for (engine, peer) in [(&a, "b"), (&b, "a")] {
            let link = engine.link(&id(peer)).unwrap();
            assert_eq!(link.signaling_state(), SignalingState::Stable);
            assert!(!link.has_held_offer());
            assert!(link.pending_candidates().is_empty());
        }
    }

    #[test]
    fn test_offer_during_answer_apply_is_held_on_polite_side() {
        let (mut a, mut b) = negotiated_pair("a", "b");
        let (answer, offer) = answer_then_offer(&mut b, &mut a);

        deliver(&mut a, &answer);
        a.drain_actions();
        let generation = a.link(&id("b")).unwrap().generation();

        deliver(&mut a, &offer);
        assert!(a.drain_actions().is_empty());

        // A completion for a description that is not being applied.
        a.remote_description_applied(&id("b"), generation, SdpKind::Offer);
        assert!(!a.has_pending_actions());
        assert!(a.link(&id("b")).unwrap().is_setting_remote_description());

        a.remote_description_applied(&id("b"), generation, SdpKind::Answer);
        let a_out = run(&mut a);
        assert_eq!(
            a_out.command_names(),
            vec!["apply-remote-description", "create-answer"]
        );
        assert!(matches!(a_out.sent.as_slice(), [ClientMessage::Answer(_)]));

        deliver(&mut b, &relay("a", &a_out.sent));
        run(&mut b);
        for (engine, peer) in [(&a, "b"), (&b, "a")] {
            assert_eq!(
                engine.link(&id(peer)).unwrap().signaling_state(),
                SignalingState::Stable
            );
        }
    }

    #[test]
    fn test_candidates_buffer_until_description_applied() {
        let mut b = engine("b");
        b.create_link(&id("a"), false).unwrap();
        run(&mut b);

        let early = [
            ServerMessage::IceCandidate(InboundCandidate {
                sender: id("a"),
                candidate: candidate("c1"),
            }),
            ServerMessage::IceCandidate(InboundCandidate {
                sender: id("a"),
                candidate: candidate("c2"),
            }),
        ];
        deliver(&mut b, &early);
        assert_eq!(b.link(&id("a")).unwrap().pending_candidates().len(), 2);

        b.handle_server_message(&ServerMessage::Offer(InboundDescription {
            sender: id("a"),
            sdp: "offer:a".into(),
            ice_restart: false,
        }));
        // Arrives while the offer is still being applied.
        b.handle_server_message(&ServerMessage::IceCandidate(InboundCandidate {
            sender: id("a"),
            candidate: candidate("c3"),
        }));
        assert!(b.link(&id("a")).unwrap().is_setting_remote_description());

        let trace = run(&mut b);
        let replayed: Vec<&str> = trace
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::AddCandidate { candidate, .. } => Some(candidate.candidate.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(replayed, vec!["c1", "c2", "c3"]);
        let names = trace.command_names();
        let last_candidate = names.iter().rposition(|n| *n == "add-candidate").unwrap();
        let answer = names.iter().position(|n| *n == "create-answer").unwrap();
        assert!(last_candidate < answer);
        assert!(b.link(&id("a")).unwrap().pending_candidates().is_empty());

        b.handle_server_message(&ServerMessage::IceCandidate(InboundCandidate {
            sender: id("a"),
            candidate: candidate("c4"),
        }));
        let later = run(&mut b);
        assert_eq!(later.count("add-candidate"), 1);
    }

    #[test]
    fn test_candidate_for_unknown_peer_is_dropped() {
        let mut a = engine("a");

        a.handle_server_message(&ServerMessage::IceCandidate(InboundCandidate {
            sender: id("ghost"),
            candidate: candidate("c1"),
        }));

        assert!(run(&mut a).commands.is_empty());
        assert_eq!(a.link_count(), 0);
    }

    #[test]
    fn test_recreating_link_replaces_old_one() {
        let mut a = engine("a");
        a.create_link(&id("b"), false).unwrap();
        let first = a.link(&id("b")).unwrap().generation();

        a.create_link(&id("b"), true).unwrap();
        let trace = run(&mut a);

        assert_eq!(a.link_count(), 1);
        assert!(a.link(&id("b")).unwrap().generation() > first);
        assert!(trace
            .commands
            .iter()
            .any(|c| matches!(c, Command::CloseLink { generation, .. } if *generation == first)));
        assert_eq!(trace.count("create-link"), 2);
    }

    #[test]
    fn test_completion_for_old_generation_is_ignored() {
        let mut a = engine("a");
        a.create_link(&id("b"), true).unwrap();
        let old = a.link(&id("b")).unwrap().generation();
        a.drain_actions();
        a.create_link(&id("b"), false).unwrap();
        a.drain_actions();

        a.offer_created(&id("b"), old, "offer:old".into());

        assert!(a.drain_actions().is_empty());
        assert_eq!(
            a.link(&id("b")).unwrap().signaling_state(),
            SignalingState::Stable
        );
    }

    #[test]
    fn test_self_link_is_rejected() {
        let mut a = engine("a");

        assert_eq!(
            a.create_link(&id("a"), true),
            Err(NegotiationError::SelfLink(id("a")))
        );
        assert_eq!(
            a.negotiation_needed(&id("z")),
            Err(NegotiationError::UnknownPeer(id("z")))
        );
    }

    #[test]
    fn test_disconnect_grace_then_ice_restart() {
        let (mut a, _b) = negotiated_pair("a", "b");
        let generation = a.link(&id("b")).unwrap().generation();
        let t0 = Instant::now();
        a.transport_state_changed(&id("b"), generation, TransportState::Connected, t0);
        a.transport_state_changed(&id("b"), generation, TransportState::Disconnected, t0);
        run(&mut a);

        assert_eq!(a.next_deadline(), Some(t0 + Duration::from_secs(3)));
        a.poll_timers(t0 + Duration::from_secs(2));
        assert_eq!(run(&mut a).count("create-offer"), 0);

        a.poll_timers(t0 + Duration::from_secs(3));
        let trace = run(&mut a);
        assert!(trace
            .commands
            .iter()
            .any(|c| matches!(c, Command::CreateOffer { ice_restart: true, .. })));
        assert!(trace
            .sent
            .iter()
            .any(|m| matches!(m, ClientMessage::Offer(d) if d.ice_restart)));
        assert_eq!(a.link(&id("b")).unwrap().ice_restarts(), 1);
    }

    #[test]
    fn test_recovery_within_grace_cancels_restart() {
        let (mut a, _b) = negotiated_pair("a", "b");
        let generation = a.link(&id("b")).unwrap().generation();
        let t0 = Instant::now();
        a.transport_state_changed(&id("b"), generation, TransportState::Disconnected, t0);
        a.transport_state_changed(
            &id("b"),
            generation,
            TransportState::Connected,
            t0 + Duration::from_secs(1),
        );

        a.poll_timers(t0 + Duration::from_secs(5));

        assert_eq!(run(&mut a).count("create-offer"), 0);
        assert_eq!(a.next_deadline(), None);
        assert_eq!(a.link(&id("b")).unwrap().phase(), LinkPhase::Connected);
    }

    #[test]
    fn test_state_changes_are_reported_to_relay() {
        let (mut a, _b) = negotiated_pair("a", "b");
        let generation = a.link(&id("b")).unwrap().generation();

        a.transport_state_changed(&id("b"), generation, TransportState::Checking, Instant::now());
        a.transport_state_changed(&id("b"), generation, TransportState::Checking, Instant::now());

        let trace = run(&mut a);
        assert!(matches!(
            trace.sent.as_slice(),
            [ClientMessage::ConnectionStateChange(change)]
                if change.target_id == id("b") && change.state == TransportState::Checking
        ));
    }

    #[test]
    fn test_restart_patience_escalates_then_degrades() {
        let config = NegotiationConfig {
            max_ice_restarts: 1,
            ..NegotiationConfig::default()
        };
        let mut a = NegotiationEngine::new(id("a"), config);
        let mut b = engine("b");
        b.create_link(&id("a"), false).unwrap();
        run(&mut b);
        a.create_link(&id("b"), true).unwrap();
        let offer = run(&mut a);
        deliver(&mut b, &relay("a", &offer.sent));
        deliver(&mut a, &relay("b", &run(&mut b).sent));
        run(&mut a);
        let now = Instant::now();

        // First failure: ICE restart.
        let generation = a.link(&id("b")).unwrap().generation();
        a.transport_state_changed(&id("b"), generation, TransportState::Failed, now);
        let restart = run(&mut a);
        assert!(restart
            .sent
            .iter()
            .any(|m| matches!(m, ClientMessage::Offer(d) if d.ice_restart)));
        deliver(&mut b, &relay("a", &restart.sent));
        deliver(&mut a, &relay("b", &run(&mut b).sent));
        run(&mut a);

        // Second failure: ask the peer to rebuild.
        a.transport_state_changed(&id("b"), generation, TransportState::Checking, now);
        a.transport_state_changed(&id("b"), generation, TransportState::Failed, now);
        let rebuild = run(&mut a);
        assert!(rebuild
            .sent
            .iter()
            .any(|m| matches!(m, ClientMessage::RestartConnection(t) if t.target_id == id("b"))));
        let rebuilt = a.link(&id("b")).unwrap().generation();
        assert!(rebuilt > generation);
        assert_eq!(a.link_count(), 1);

        // Failure on the rebuilt link: give up.
        a.transport_state_changed(&id("b"), rebuilt, TransportState::Failed, now);
        let degraded = run(&mut a);
        assert!(degraded
            .events
            .contains(&EngineEvent::LinkDegraded { peer: id("b") }));
        assert_eq!(a.link(&id("b")).unwrap().phase(), LinkPhase::Failed);
    }

    #[test]
    fn test_restart_request_rebuilds_and_offers() {
        let (_a, mut b) = negotiated_pair("a", "b");
        let before = b.link(&id("a")).unwrap().generation();

        b.handle_server_message(&ServerMessage::RestartConnection(RestartRequest {
            sender: id("a"),
        }));
        let trace = run(&mut b);

        assert_eq!(b.link_count(), 1);
        assert!(b.link(&id("a")).unwrap().generation() > before);
        assert_eq!(
            trace.command_names().first().copied(),
            Some("close-link")
        );
        assert!(trace.sent.iter().any(|m| matches!(m, ClientMessage::Offer(_))));
    }

    fn with_camera(engine: &mut NegotiationEngine) {
        engine.start_local_media();
        engine.media_acquired(MediaSource::Microphone, AcquiredTracks::audio("mic"));
        engine.media_acquired(MediaSource::Camera, AcquiredTracks::video("cam"));
        run(engine);
    }

    #[test]
    fn test_screen_swap_replaces_without_renegotiation() {
        let mut a = engine("a");
        let mut b = engine("b");
        with_camera(&mut a);
        b.create_link(&id("a"), false).unwrap();
        run(&mut b);
        a.create_link(&id("b"), true).unwrap();
        let offer = run(&mut a);
        assert_eq!(offer.count("add-track"), 2);
        deliver(&mut b, &relay("a", &offer.sent));
        deliver(&mut a, &relay("b", &run(&mut b).sent));
        run(&mut a);

        a.start_screen_capture(false);
        let acquire = run(&mut a);
        assert!(acquire.commands.iter().any(|c| matches!(
            c,
            Command::Acquire(MediaSource::Screen { with_audio: false })
        )));
        a.media_acquired(
            MediaSource::Screen { with_audio: false },
            AcquiredTracks::video("screen"),
        );
        let on = run(&mut a);
        a.stop_screen_capture();
        let off = run(&mut a);

        for trace in [&on, &off] {
            assert_eq!(trace.count("create-offer"), 0);
            assert_eq!(trace.count("close-link"), 0);
            assert_eq!(trace.count("replace-track"), 1);
        }
        assert!(off.commands.iter().any(|c| matches!(
            c,
            Command::ReplaceTrack { track: Some(t), .. } if t.as_str() == "cam"
        )));
        assert_eq!(a.link(&id("b")).unwrap().offers_sent(), 1);
        assert_eq!(a.link(&id("b")).unwrap().signaling_state(), SignalingState::Stable);
    }

    #[test]
    fn test_new_sender_renegotiates() {
        let (mut a, _b) = negotiated_pair("a", "b");

        a.media_acquired(MediaSource::Camera, AcquiredTracks::video("cam"));
        let trace = run(&mut a);

        assert_eq!(trace.count("add-track"), 1);
        assert_eq!(trace.count("create-offer"), 1);
        assert!(a.link(&id("b")).unwrap().has_sender(crate::media::TrackSlot::Video));
    }

    #[test]
    fn test_ready_waits_for_join_and_media() {
        let mut a = engine("a");
        a.start_local_media();
        a.media_acquired(MediaSource::Microphone, AcquiredTracks::audio("mic"));
        assert!(!run(&mut a)
            .sent
            .iter()
            .any(|m| matches!(m, ClientMessage::ParticipantReady)));

        a.media_unavailable(MediaSource::Camera, "no camera");
        let trace = run(&mut a);
        assert!(trace.events.iter().any(|e| matches!(
            e,
            EngineEvent::MediaUnavailable { source: MediaSource::Camera, .. }
        )));
        assert!(trace.sent.is_empty());

        let snapshot = relay_snapshot("a");
        a.handle_server_message(&snapshot);
        let trace = run(&mut a);
        assert!(matches!(trace.sent.as_slice(), [ClientMessage::ParticipantReady]));

        a.handle_server_message(&snapshot);
        assert!(run(&mut a).sent.is_empty());
    }

    fn relay_snapshot(local: &str) -> ServerMessage {
        use signaling_protocol::{MeetingSnapshot, Permissions};
        ServerMessage::JoinedMeeting(Box::new(MeetingSnapshot {
            meeting_id: MeetingId::parse("room").unwrap(),
            meeting_name: "Room".into(),
            self_id: id(local),
            is_host: true,
            host_id: Some(id(local)),
            host_name: "Host".into(),
            participants: Vec::new(),
            spotlighted_participant: None,
            raised_hands: Vec::new(),
            screen_shares: Vec::new(),
            is_locked: false,
            permissions: Permissions::default(),
            transport_config: TransportConfig::default(),
            created_at: chrono::Utc::now(),
            connection_attempts: BTreeMap::new(),
        }))
    }

    #[test]
    fn test_initiate_connection_opens_link() {
        let mut a = engine("a");

        a.handle_server_message(&ServerMessage::InitiateConnection(InitiateConnection {
            target_id: id("b"),
            should_create_offer: true,
            transport_config: TransportConfig::default(),
        }));
        let trace = run(&mut a);

        assert_eq!(
            trace.command_names(),
            vec!["create-link", "create-offer"]
        );
        assert!(matches!(trace.sent.as_slice(), [ClientMessage::Offer(d)] if d.target == id("b")));
    }

    #[test]
    fn test_kick_ends_session_and_releases_media() {
        let mut a = engine("a");
        with_camera(&mut a);
        a.create_link(&id("b"), false).unwrap();
        a.create_link(&id("c"), false).unwrap();
        run(&mut a);

        a.handle_server_message(&ServerMessage::KickedFromMeeting(KickedFromMeeting {
            meeting_id: MeetingId::parse("room").unwrap(),
            kicked_by: "Host".into(),
            message: "bye".into(),
        }));
        let trace = run(&mut a);

        assert_eq!(a.link_count(), 0);
        assert_eq!(trace.count("close-link"), 2);
        assert_eq!(trace.count("stop-track"), 2);
        assert!(trace.events.contains(&EngineEvent::SessionEnded {
            reason: "kicked".into()
        }));
    }

    #[test]
    fn test_health_check_is_answered() {
        let mut a = engine("a");

        a.handle_server_message(&ServerMessage::ConnectionHealthCheck(HealthCheck {
            timestamp: 1,
        }));

        assert!(matches!(run(&mut a).sent.as_slice(), [ClientMessage::Heartbeat]));
    }
}

//! Per-peer negotiation state.

use std::collections::BTreeSet;

use common::types::ConnectionId;
use signaling_protocol::{IceCandidate, TransportState};

use crate::command::SdpKind;
use crate::media::TrackSlot;
use crate::role::Role;

/// Offer/answer state of the local description pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Coarse lifecycle shown to the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkPhase {
    #[default]
    Idle,
    Negotiating,
    Stable,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Why an offer is being made. Only local changes are worth re-offering
/// after a polite rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OfferReason {
    Initial,
    TrackChange,
    IceRestart,
}

/// One direct media link to a peer.
///
/// Only the engine mutates a link; the fields are readable for
/// assertions and status displays.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub(crate) peer: ConnectionId,
    pub(crate) role: Role,
    pub(crate) generation: u64,
    pub(crate) phase: LinkPhase,
    pub(crate) signaling_state: SignalingState,
    pub(crate) making_offer: bool,
    pub(crate) ignore_offer: bool,
    pub(crate) is_setting_remote_description: bool,
    pub(crate) has_remote_description: bool,
    pub(crate) applying: Option<SdpKind>,
    /// Remote offer that arrived while a description was being applied.
    pub(crate) held_offer: Option<String>,
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) transport_state: TransportState,
    pub(crate) senders: BTreeSet<TrackSlot>,
    pub(crate) in_flight: Option<OfferReason>,
    pub(crate) queued: Option<OfferReason>,
    pub(crate) ice_restarts: u32,
    pub(crate) escalated: bool,
    pub(crate) offers_sent: u32,
    pub(crate) ignored_offers: u32,
}

impl PeerLink {
    pub(crate) fn new(local: &ConnectionId, peer: ConnectionId, generation: u64) -> Self {
        Self {
            role: Role::for_pair(local, &peer),
            peer,
            generation,
            phase: LinkPhase::Idle,
            signaling_state: SignalingState::Stable,
            making_offer: false,
            ignore_offer: false,
            is_setting_remote_description: false,
            has_remote_description: false,
            applying: None,
            held_offer: None,
            pending_candidates: Vec::new(),
            transport_state: TransportState::New,
            senders: BTreeSet::new(),
            in_flight: None,
            queued: None,
            ice_restarts: 0,
            escalated: false,
            offers_sent: 0,
            ignored_offers: 0,
        }
    }

    #[must_use]
    pub fn peer(&self) -> &ConnectionId {
        &self.peer
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    #[must_use]
    pub fn making_offer(&self) -> bool {
        self.making_offer
    }

    #[must_use]
    pub fn ignore_offer(&self) -> bool {
        self.ignore_offer
    }

    #[must_use]
    pub fn is_setting_remote_description(&self) -> bool {
        self.is_setting_remote_description
    }

    #[must_use]
    pub fn has_held_offer(&self) -> bool {
        self.held_offer.is_some()
    }

    #[must_use]
    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    #[must_use]
    pub fn transport_state(&self) -> TransportState {
        self.transport_state
    }

    #[must_use]
    pub fn has_sender(&self, slot: TrackSlot) -> bool {
        self.senders.contains(&slot)
    }

    #[must_use]
    pub fn ice_restarts(&self) -> u32 {
        self.ice_restarts
    }

    #[must_use]
    pub fn offers_sent(&self) -> u32 {
        self.offers_sent
    }

    #[must_use]
    pub fn ignored_offers(&self) -> u32 {
        self.ignored_offers
    }

    /// A remote offer now would collide with our own negotiation.
    ///
    /// An answer being applied is not a collision: that exchange is
    /// already settled on both ends.
    pub(crate) fn offer_collision(&self) -> bool {
        let answer_pending = self.applying == Some(SdpKind::Answer);
        self.making_offer || (self.signaling_state != SignalingState::Stable && !answer_pending)
    }

    /// Candidates must wait until a remote description is in place.
    pub(crate) fn must_buffer_candidates(&self) -> bool {
        self.is_setting_remote_description
            || self.held_offer.is_some()
            || !self.has_remote_description
    }

    pub(crate) fn can_offer_now(&self) -> bool {
        !self.making_offer
            && !self.is_setting_remote_description
            && self.held_offer.is_none()
            && self.signaling_state == SignalingState::Stable
    }

    /// Remember a negotiation to run once the link is stable again. An ICE
    /// restart outranks a track change.
    pub(crate) fn queue(&mut self, reason: OfferReason) {
        self.queued = match (self.queued, reason) {
            (Some(OfferReason::IceRestart), _) | (_, OfferReason::IceRestart) => {
                Some(OfferReason::IceRestart)
            }
            _ => Some(reason),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_idle_and_stable() {
        let link = PeerLink::new(&ConnectionId::from("a"), ConnectionId::from("b"), 1);

        assert_eq!(link.phase(), LinkPhase::Idle);
        assert_eq!(link.signaling_state(), SignalingState::Stable);
        assert!(link.role().is_polite());
        assert!(link.must_buffer_candidates());
        assert!(link.can_offer_now());
    }

    #[test]
    fn test_ice_restart_outranks_track_change() {
        let mut link = PeerLink::new(&ConnectionId::from("a"), ConnectionId::from("b"), 1);

        link.queue(OfferReason::IceRestart);
        link.queue(OfferReason::TrackChange);

        assert_eq!(link.queued, Some(OfferReason::IceRestart));
    }

    #[test]
    fn test_offer_during_answer_apply_is_not_a_collision() {
        let mut link = PeerLink::new(&ConnectionId::from("a"), ConnectionId::from("b"), 1);
        link.signaling_state = SignalingState::HaveLocalOffer;
        assert!(link.offer_collision());

        link.is_setting_remote_description = true;
        link.applying = Some(SdpKind::Answer);

        assert!(!link.offer_collision());
        assert!(!link.can_offer_now());
    }
}

//! Engine outputs.

use common::types::ConnectionId;
use signaling_protocol::{ClientMessage, IceCandidate, TransportConfig};

use crate::link::LinkPhase;
use crate::media::{MediaSource, TrackId, TrackSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Work for the media backend.
///
/// Link commands carry the link generation. Completions for an older
/// generation are discarded by the engine.
#[derive(Debug, Clone)]
pub enum Command {
    CreateLink {
        peer: ConnectionId,
        generation: u64,
        transport: TransportConfig,
    },
    CloseLink {
        peer: ConnectionId,
        generation: u64,
    },
    /// Create an offer and apply it locally.
    CreateOffer {
        peer: ConnectionId,
        generation: u64,
        ice_restart: bool,
    },
    /// Create an answer and apply it locally.
    CreateAnswer {
        peer: ConnectionId,
        generation: u64,
    },
    ApplyRemoteDescription {
        peer: ConnectionId,
        generation: u64,
        kind: SdpKind,
        sdp: String,
    },
    /// Discard the local offer so a remote one can be applied.
    Rollback {
        peer: ConnectionId,
        generation: u64,
    },
    AddCandidate {
        peer: ConnectionId,
        generation: u64,
        candidate: IceCandidate,
    },
    AddTrack {
        peer: ConnectionId,
        generation: u64,
        slot: TrackSlot,
        track: TrackId,
    },
    ReplaceTrack {
        peer: ConnectionId,
        generation: u64,
        slot: TrackSlot,
        track: Option<TrackId>,
    },
    RemoveTrack {
        peer: ConnectionId,
        generation: u64,
        slot: TrackSlot,
    },
    Acquire(MediaSource),
    SetTrackEnabled {
        track: TrackId,
        enabled: bool,
    },
    StopTrack(TrackId),
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateLink { .. } => "create-link",
            Command::CloseLink { .. } => "close-link",
            Command::CreateOffer { .. } => "create-offer",
            Command::CreateAnswer { .. } => "create-answer",
            Command::ApplyRemoteDescription { .. } => "apply-remote-description",
            Command::Rollback { .. } => "rollback",
            Command::AddCandidate { .. } => "add-candidate",
            Command::AddTrack { .. } => "add-track",
            Command::ReplaceTrack { .. } => "replace-track",
            Command::RemoveTrack { .. } => "remove-track",
            Command::Acquire(_) => "acquire",
            Command::SetTrackEnabled { .. } => "set-track-enabled",
            Command::StopTrack(_) => "stop-track",
        }
    }

    /// Peer the command targets, for link commands.
    #[must_use]
    pub fn peer(&self) -> Option<&ConnectionId> {
        match self {
            Command::CreateLink { peer, .. }
            | Command::CloseLink { peer, .. }
            | Command::CreateOffer { peer, .. }
            | Command::CreateAnswer { peer, .. }
            | Command::ApplyRemoteDescription { peer, .. }
            | Command::Rollback { peer, .. }
            | Command::AddCandidate { peer, .. }
            | Command::AddTrack { peer, .. }
            | Command::ReplaceTrack { peer, .. }
            | Command::RemoveTrack { peer, .. } => Some(peer),
            Command::Acquire(_) | Command::SetTrackEnabled { .. } | Command::StopTrack(_) => None,
        }
    }
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    LinkCreated { peer: ConnectionId },
    LinkPhaseChanged { peer: ConnectionId, phase: LinkPhase },
    LinkClosed { peer: ConnectionId },
    /// Restarts are exhausted; show the link as failed.
    LinkDegraded { peer: ConnectionId },
    MediaUnavailable { source: MediaSource, reason: String },
    /// The meeting is over for us (ended, kicked, or left).
    SessionEnded { reason: String },
}

/// One engine output, in the order it must be carried out.
#[derive(Debug, Clone)]
pub enum Action {
    Execute(Command),
    Send(ClientMessage),
    Notify(EngineEvent),
}

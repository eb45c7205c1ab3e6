//! Client-side peer negotiation for meetings.
//!
//! Every pair of ready participants shares one direct media link. This
//! crate keeps those links negotiated with the "perfect negotiation"
//! pattern: both ends may start an offer at any time, and a fixed
//! polite/impolite role per pair decides who yields when offers cross.
//!
//! # Layers
//!
//! - [`NegotiationEngine`] is sans-IO. It consumes server messages and
//!   completion callbacks and produces an ordered list of [`Action`]s:
//!   backend [`Command`]s, outbound client messages and [`EngineEvent`]s.
//!   Time only enters through explicit `now` arguments and
//!   [`NegotiationEngine::poll_timers`].
//! - [`MediaTrackController`] owns the local microphone, camera and screen
//!   tracks and decides which one each link sends.
//! - [`driver::PeerDriver`] runs an engine against a real
//!   [`driver::MediaBackend`] on a tokio task.

#![warn(clippy::pedantic)]

pub mod command;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod link;
pub mod media;
pub mod role;
pub mod scheduler;

pub use command::{Action, Command, EngineEvent, SdpKind};
pub use config::NegotiationConfig;
pub use engine::NegotiationEngine;
pub use error::{BackendError, NegotiationError};
pub use link::{LinkPhase, PeerLink, SignalingState};
pub use media::{
    AcquiredTracks, MediaSource, MediaStep, MediaTrackController, TrackChange, TrackId,
    TrackPolicy, TrackSlot,
};
pub use role::Role;
pub use scheduler::Scheduler;

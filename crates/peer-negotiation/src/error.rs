//! Negotiation error types.

use common::types::ConnectionId;
use thiserror::Error;

/// Misuse of the engine API.
///
/// Protocol races (stale answers, candidates for unknown peers, colliding
/// offers) are expected and never surface as errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("cannot open a link to ourselves ({0})")]
    SelfLink(ConnectionId),

    #[error("no link to peer {0}")]
    UnknownPeer(ConnectionId),

    #[error("driver stopped: {0}")]
    DriverStopped(String),
}

/// Failure reported by a media backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("peer link operation failed: {0}")]
    Operation(String),
}

//! Message types for actor communication.
//!
//! Requests that need an answer carry a `oneshot::Sender`; inbound frames
//! and disconnects are fire-and-forget so a socket reader never waits on
//! the relay's reply.

use std::sync::Arc;

use common::types::{ConnectionId, MeetingId};
use serde::Serialize;
use signaling_protocol::ServerMessage;
use tokio::sync::oneshot;

use super::connection::ConnectionHandle;
use crate::errors::RelayError;
use crate::relay::MeetingInfo;

/// Messages sent to the `RelayActor`.
#[derive(Debug)]
pub enum RelayMessage {
    /// Register a freshly accepted socket.
    Connect {
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// One text frame read from a socket.
    Inbound {
        connection_id: ConnectionId,
        frame: String,
    },

    /// The socket closed; run disconnect handling.
    Disconnect { connection_id: ConnectionId },

    GetMeetingInfo {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Option<MeetingInfo>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RelayStatus>,
    },

    /// Stop accepting sockets and close the open ones.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    Deliver { message: Arc<ServerMessage> },
    Close { reason: String },
}

/// What a connection actor hands to the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { reason: String },
}

/// Relay counters served by `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub relay_id: String,
    pub meetings: usize,
    pub participants: usize,
    pub connections: usize,
    pub accepting_new: bool,
}

//! Signaling protocol for meeting clients and the relay.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! [`ClientMessage`] covers what clients send, [`ServerMessage`] what the
//! relay sends back. [`codec`] turns frames into typed messages and rejects
//! malformed payloads before anything touches meeting state.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;
pub mod model;

pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    ProtocolError, ReplyChannel, ValidationError,
};
pub use messages::{ClientMessage, ServerMessage};
pub use model::{
    ConnectionState, IceCandidate, IceServer, LeaveReason, MeetingSnapshot, ParticipantView,
    Permissions, PermissionsPatch, ScreenShareInfo, TransportConfig, TransportState,
};

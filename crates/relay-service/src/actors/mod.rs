//! Actor runtime for the relay.
//!
//! ```text
//! RelayActor (one per process, owns the SignalingRelay)
//! └── ConnectionActor (one per signaling socket, owns its outbound queue)
//! ```
//!
//! - All registry mutations run on the relay actor, one message at a time
//! - Connection actors get child tokens of the relay's root token
//! - Relay-to-connection delivery never blocks; a full mailbox drops and
//!   counts the message

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod relay;

pub use connection::{ConnectionActor, ConnectionHandle};
pub use messages::{ConnectionMessage, OutboundFrame, RelayMessage, RelayStatus};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use relay::RelayActorHandle;

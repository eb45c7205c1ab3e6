//! # Relay Test Utilities
//!
//! Shared test utilities for the meeting relay.
//!
//! ## Modules
//!
//! - `fixtures` - Builders for client messages and identifiers
//! - `relay_harness` - Drives a [`SignalingRelay`] in-process with a
//!   controllable clock and per-connection inboxes
//! - `negotiation_pipe` - Connects negotiation engines through an
//!   in-process relay with an instant fake media backend
//! - `server_harness` - Spawns a real relay server on a random port and
//!   talks to it over WebSockets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[test]
//! fn test_example() {
//!     let mut harness = RelayHarness::new();
//!     harness.send("host", join_as_host("ROOM-1", "Hana"));
//!     harness.send("guest", join_meeting("ROOM-1", "Gus"));
//!
//!     assert_eq!(harness.events("host"), vec!["joined-meeting", "participant-joined"]);
//! }
//! ```
//!
//! [`SignalingRelay`]: relay_service::relay::SignalingRelay

pub mod fixtures;
pub mod negotiation_pipe;
pub mod relay_harness;
pub mod server_harness;

pub use fixtures::*;
pub use negotiation_pipe::MeetingPipe;
pub use relay_harness::RelayHarness;
pub use server_harness::{TestRelayServer, WsTestClient};

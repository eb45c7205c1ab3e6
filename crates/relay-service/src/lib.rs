//! Meeting relay service library.
//!
//! A stateful WebSocket signaling server that:
//!
//! - keeps the authoritative registry of meetings and participants
//! - relays offers, answers and candidates between peers in a meeting
//! - broadcasts meeting state changes (host, mute, spotlight, lock)
//! - probes silent participants with liveness checks
//!
//! # Architecture
//!
//! ```text
//! RelayActor (one per process)
//! ├── owns SignalingRelay -> MeetingRegistry
//! └── ConnectionActor (one per WebSocket)
//! ```
//!
//! The [`relay`] and [`registry`] modules are transport-free and can be
//! driven directly in tests; [`actors`] and [`transport`] put them on the
//! network.
//!
//! # Modules
//!
//! - [`actors`] - relay and connection actors
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with client-safe messages
//! - [`observability`] - metrics and health probes
//! - [`registry`] - meeting and participant state
//! - [`relay`] - signaling dispatch and fan-out
//! - [`routes`] / [`handlers`] - HTTP API
//! - [`transport`] - WebSocket signaling

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod transport;

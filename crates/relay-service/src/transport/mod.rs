//! Client-facing transports.
//!
//! Only WebSocket is implemented; each accepted socket gets a
//! `ConnectionActor` and is registered with the relay actor.

pub mod ws;

pub use ws::ws_handler;

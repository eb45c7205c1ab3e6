//! Common types shared across the meeting relay and its clients.

#![warn(clippy::pedantic)]

/// Module for identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

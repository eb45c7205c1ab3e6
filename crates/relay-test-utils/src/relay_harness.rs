//! In-process harness around [`SignalingRelay`].
//!
//! Every delivery the relay produces lands in the recipient's inbox, in
//! order. Tests drain inboxes with [`RelayHarness::take`] or
//! [`RelayHarness::events`] and advance the clock explicitly.

use std::collections::HashMap;
use std::time::Duration;

use common::types::ConnectionId;
use relay_service::relay::{Outbox, RelaySettings, SignalingRelay};
use signaling_protocol::{ClientMessage, ServerMessage};
use tokio::time::Instant;

pub struct RelayHarness {
    relay: SignalingRelay,
    now: Instant,
    inboxes: HashMap<ConnectionId, Vec<ServerMessage>>,
}

impl Default for RelayHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(RelaySettings::default())
    }

    #[must_use]
    pub fn with_settings(settings: RelaySettings) -> Self {
        Self {
            relay: SignalingRelay::new(settings),
            now: Instant::now(),
            inboxes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Move the harness clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Handle `message` as if it arrived on connection `from`.
    pub fn send(&mut self, from: &str, message: ClientMessage) {
        let out = self.relay.handle(&ConnectionId::from(from), message, self.now);
        self.route(out);
    }

    /// Handle a raw text frame as if it arrived on connection `from`.
    pub fn send_frame(&mut self, from: &str, frame: &str) {
        let out = self
            .relay
            .handle_frame(&ConnectionId::from(from), frame, self.now);
        self.route(out);
    }

    pub fn disconnect(&mut self, from: &str) {
        let out = self.relay.disconnect(&ConnectionId::from(from));
        self.route(out);
    }

    /// Run one heartbeat sweep at the current harness time.
    pub fn sweep(&mut self) {
        let out = self.relay.health_sweep(self.now);
        self.route(out);
    }

    /// Drain and return everything delivered to `conn` so far.
    pub fn take(&mut self, conn: &str) -> Vec<ServerMessage> {
        self.inboxes
            .remove(&ConnectionId::from(conn))
            .unwrap_or_default()
    }

    /// Drain the inbox of `conn` and return the event names, in order.
    pub fn events(&mut self, conn: &str) -> Vec<&'static str> {
        self.take(conn).iter().map(ServerMessage::event_name).collect()
    }

    /// Drop everything queued for every connection.
    pub fn clear(&mut self) {
        self.inboxes.clear();
    }

    fn route(&mut self, out: Outbox) {
        for delivery in out {
            self.inboxes
                .entry(delivery.to)
                .or_default()
                .push((*delivery.message).clone());
        }
    }
}

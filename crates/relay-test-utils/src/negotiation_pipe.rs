//! Negotiation engines wired together through an in-process relay.
//!
//! Every participant gets a [`NegotiationEngine`] whose backend completes
//! each command immediately. Messages the engines send go through a real
//! [`SignalingRelay`]; the relay's deliveries wait in one FIFO queue until
//! [`MeetingPipe::pump`] hands them to the recipients. Holding deliveries
//! back lets tests line up races such as two offers crossing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use common::types::ConnectionId;
use peer_negotiation::{
    AcquiredTracks, Action, Command, EngineEvent, MediaSource, NegotiationConfig, NegotiationEngine,
};
use relay_service::relay::{Outbox, RelaySettings, SignalingRelay};
use signaling_protocol::{ClientMessage, ServerMessage, TransportState};
use tokio::time::Instant;

use crate::fixtures::{join_as_host, join_meeting};

/// Deliveries handled by one [`MeetingPipe::pump`] before it gives up.
const MAX_DELIVERIES_PER_PUMP: usize = 10_000;

pub struct MeetingPipe {
    relay: SignalingRelay,
    now: Instant,
    config: NegotiationConfig,
    engines: BTreeMap<ConnectionId, NegotiationEngine>,
    queue: VecDeque<(ConnectionId, ServerMessage)>,
    received: HashMap<ConnectionId, Vec<ServerMessage>>,
    commands: HashMap<ConnectionId, Vec<Command>>,
    events: HashMap<ConnectionId, Vec<EngineEvent>>,
    sdp_seq: u64,
}

impl Default for MeetingPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingPipe {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(RelaySettings::default(), NegotiationConfig::default())
    }

    #[must_use]
    pub fn with_settings(settings: RelaySettings, config: NegotiationConfig) -> Self {
        Self {
            relay: SignalingRelay::new(settings),
            now: Instant::now(),
            config,
            engines: BTreeMap::new(),
            queue: VecDeque::new(),
            received: HashMap::new(),
            commands: HashMap::new(),
            events: HashMap::new(),
            sdp_seq: 0,
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

    /// Engine of participant `id`. Panics if there is none.
    #[must_use]
    pub fn engine(&self, id: &str) -> &NegotiationEngine {
        self.engines
            .get(&ConnectionId::from(id))
            .unwrap_or_else(|| panic!("no engine for {id}"))
    }

    /// Run `f` against the engine of `id`, then carry out what it queued.
    /// Relay deliveries stay queued until [`MeetingPipe::pump`].
    pub fn with_engine<T>(&mut self, id: &str, f: impl FnOnce(&mut NegotiationEngine) -> T) -> T {
        let conn = ConnectionId::from(id);
        let engine = self
            .engines
            .get_mut(&conn)
            .unwrap_or_else(|| panic!("no engine for {id}"));
        let value = f(engine);
        self.flush(&conn);
        value
    }

    /// Join as host with working microphone and camera, then pump.
    pub fn host(&mut self, id: &str, meeting: &str) {
        self.enter(id, join_as_host(meeting, id));
    }

    /// Join as guest with working microphone and camera, then pump.
    pub fn join(&mut self, id: &str, meeting: &str) {
        self.enter(id, join_meeting(meeting, id));
    }

    fn enter(&mut self, id: &str, join: ClientMessage) {
        let conn = ConnectionId::from(id);
        let mut engine = NegotiationEngine::new(conn.clone(), self.config);
        engine.start_local_media();
        self.engines.insert(conn.clone(), engine);
        self.flush(&conn);
        self.client_send(id, join);
        self.pump();
    }

    /// Send `message` from `id` straight to the relay. Deliveries are queued.
    pub fn client_send(&mut self, id: &str, message: ClientMessage) {
        let out = self.relay.handle(&ConnectionId::from(id), message, self.now);
        self.enqueue(out);
    }

    /// Drop the connection of `id`: its engine disappears and the relay
    /// runs disconnect cleanup.
    pub fn disconnect(&mut self, id: &str) {
        let conn = ConnectionId::from(id);
        self.engines.remove(&conn);
        let out = self.relay.disconnect(&conn);
        self.enqueue(out);
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Fire engine timers due at the pipe's clock.
    pub fn poll_timers(&mut self) {
        let now = self.now;
        let ids: Vec<ConnectionId> = self.engines.keys().cloned().collect();
        for conn in ids {
            if let Some(engine) = self.engines.get_mut(&conn) {
                engine.poll_timers(now);
            }
            self.flush(&conn);
        }
    }

    /// Report a transport state change on `id`'s current link to `peer`.
    pub fn transport(&mut self, id: &str, peer: &str, state: TransportState) {
        let now = self.now;
        let peer = ConnectionId::from(peer);
        self.with_engine(id, |engine| {
            if let Some(generation) = engine.link(&peer).map(peer_negotiation::PeerLink::generation) {
                engine.transport_state_changed(&peer, generation, state, now);
            }
        });
    }

    /// Mark every current link connected on both ends.
    pub fn connect_all(&mut self) {
        let pairs: Vec<(String, String)> = self
            .engines
            .values()
            .flat_map(|engine| {
                engine.links().map(move |link| {
                    (
                        engine.local_id().as_str().to_string(),
                        link.peer().as_str().to_string(),
                    )
                })
            })
            .collect();
        for (id, peer) in pairs {
            self.transport(&id, &peer, TransportState::Connected);
        }
    }

    /// Deliver queued messages until nothing is left.
    ///
    /// Returns how many deliveries were made.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Some((to, message)) = self.queue.pop_front() {
            delivered += 1;
            assert!(
                delivered <= MAX_DELIVERIES_PER_PUMP,
                "signaling did not settle after {MAX_DELIVERIES_PER_PUMP} deliveries"
            );
            if let Some(engine) = self.engines.get_mut(&to) {
                engine.handle_server_message(&message);
            }
            self.received.entry(to.clone()).or_default().push(message);
            self.flush(&to);
        }
        delivered
    }

    /// Everything `id` received, drained.
    pub fn take_received(&mut self, id: &str) -> Vec<ServerMessage> {
        self.received
            .remove(&ConnectionId::from(id))
            .unwrap_or_default()
    }

    /// Event names `id` received, drained.
    pub fn received_events(&mut self, id: &str) -> Vec<&'static str> {
        self.take_received(id)
            .iter()
            .map(ServerMessage::event_name)
            .collect()
    }

    /// Backend commands `id`'s engine issued, drained.
    pub fn take_commands(&mut self, id: &str) -> Vec<Command> {
        self.commands
            .remove(&ConnectionId::from(id))
            .unwrap_or_default()
    }

    /// Engine events `id` emitted, drained.
    pub fn take_events(&mut self, id: &str) -> Vec<EngineEvent> {
        self.events
            .remove(&ConnectionId::from(id))
            .unwrap_or_default()
    }

    /// Carry out `conn`'s actions, completing backend work on the spot.
    fn flush(&mut self, conn: &ConnectionId) {
        loop {
            let Some(engine) = self.engines.get_mut(conn) else {
                return;
            };
            let actions = engine.drain_actions();
            if actions.is_empty() {
                return;
            }
            for action in actions {
                match action {
                    Action::Execute(command) => {
                        self.complete(conn, &command);
                        self.commands.entry(conn.clone()).or_default().push(command);
                    }
                    Action::Send(message) => {
                        let out = self.relay.handle(conn, message, self.now);
                        self.enqueue(out);
                    }
                    Action::Notify(event) => {
                        self.events.entry(conn.clone()).or_default().push(event);
                    }
                }
            }
        }
    }

    fn complete(&mut self, conn: &ConnectionId, command: &Command) {
        self.sdp_seq += 1;
        let sdp = format!("sdp-{}-{}", conn, self.sdp_seq);
        let Some(engine) = self.engines.get_mut(conn) else {
            return;
        };
        match command {
            Command::CreateOffer { peer, generation, .. } => {
                engine.offer_created(peer, *generation, sdp);
            }
            Command::CreateAnswer { peer, generation } => {
                engine.answer_created(peer, *generation, sdp);
            }
            Command::ApplyRemoteDescription { peer, generation, kind, .. } => {
                engine.remote_description_applied(peer, *generation, *kind);
            }
            Command::Acquire(source) => {
                let tracks = match source {
                    MediaSource::Microphone => AcquiredTracks::audio(format!("{conn}-mic")),
                    MediaSource::Camera => AcquiredTracks::video(format!("{conn}-cam")),
                    MediaSource::Screen { .. } => AcquiredTracks::video(format!("{conn}-screen")),
                };
                engine.media_acquired(*source, tracks);
            }
            _ => {}
        }
    }

    fn enqueue(&mut self, out: Outbox) {
        for delivery in out {
            self.queue
                .push_back((delivery.to, (*delivery.message).clone()));
        }
    }
}

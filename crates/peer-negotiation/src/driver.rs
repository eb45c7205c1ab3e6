//! Runs a [`NegotiationEngine`] against a real media backend.
//!
//! The driver owns the engine and the backend on one tokio task. Actions
//! are carried out strictly in order and each backend completion is fed
//! back into the engine before the next action runs, so the engine never
//! sees two operations on the same link overlap.

use async_trait::async_trait;
use common::types::ConnectionId;
use signaling_protocol::{ClientMessage, IceCandidate, ServerMessage, TransportConfig, TransportState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::command::{Action, Command, EngineEvent, SdpKind};
use crate::engine::NegotiationEngine;
use crate::error::{BackendError, NegotiationError};
use crate::media::{AcquiredTracks, MediaSource, TrackId, TrackSlot};

/// Default capacity for the user command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Peer links and capture devices.
///
/// Offer and answer creation also apply the new local description.
#[async_trait]
pub trait MediaBackend: Send {
    async fn create_link(
        &mut self,
        peer: &ConnectionId,
        generation: u64,
        transport: &TransportConfig,
    ) -> Result<(), BackendError>;

    async fn close_link(&mut self, peer: &ConnectionId) -> Result<(), BackendError>;

    async fn create_offer(&mut self, peer: &ConnectionId, ice_restart: bool) -> Result<String, BackendError>;

    async fn create_answer(&mut self, peer: &ConnectionId) -> Result<String, BackendError>;

    async fn apply_remote_description(
        &mut self,
        peer: &ConnectionId,
        kind: SdpKind,
        sdp: &str,
    ) -> Result<(), BackendError>;

    async fn rollback(&mut self, peer: &ConnectionId) -> Result<(), BackendError>;

    async fn add_candidate(&mut self, peer: &ConnectionId, candidate: &IceCandidate) -> Result<(), BackendError>;

    async fn add_track(&mut self, peer: &ConnectionId, slot: TrackSlot, track: &TrackId) -> Result<(), BackendError>;

    async fn replace_track(
        &mut self,
        peer: &ConnectionId,
        slot: TrackSlot,
        track: Option<&TrackId>,
    ) -> Result<(), BackendError>;

    async fn remove_track(&mut self, peer: &ConnectionId, slot: TrackSlot) -> Result<(), BackendError>;

    async fn acquire(&mut self, source: MediaSource) -> Result<AcquiredTracks, BackendError>;

    async fn set_track_enabled(&mut self, track: &TrackId, enabled: bool) -> Result<(), BackendError>;

    async fn stop_track(&mut self, track: &TrackId) -> Result<(), BackendError>;
}

/// Things the backend reports on its own.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    LocalCandidate {
        peer: ConnectionId,
        generation: u64,
        candidate: IceCandidate,
    },
    TransportStateChanged {
        peer: ConnectionId,
        generation: u64,
        state: TransportState,
    },
    CaptureEnded {
        track: TrackId,
    },
}

/// Requests from the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    SetAudio(bool),
    SetVideo(bool),
    StartScreenShare { with_audio: bool },
    StopScreenShare,
    Leave,
}

/// Channels the driver is wired to.
#[derive(Debug)]
pub struct DriverChannels {
    /// Messages from the relay.
    pub inbound: mpsc::Receiver<ServerMessage>,
    /// Messages for the relay.
    pub outbound: mpsc::Sender<ClientMessage>,
    pub backend_events: mpsc::Receiver<BackendEvent>,
    /// Notifications for the application. Dropping the receiver is fine.
    pub app_events: mpsc::Sender<EngineEvent>,
}

/// Handle to a running [`PeerDriver`].
#[derive(Clone, Debug)]
pub struct DriverHandle {
    commands: mpsc::Sender<UserCommand>,
    cancel_token: CancellationToken,
}

impl DriverHandle {
    /// # Errors
    ///
    /// `DriverStopped` once the driver task has exited.
    pub async fn send(&self, command: UserCommand) -> Result<(), NegotiationError> {
        self.commands
            .send(command)
            .await
            .map_err(|e| NegotiationError::DriverStopped(e.to_string()))
    }

    /// # Errors
    ///
    /// `DriverStopped` once the driver task has exited.
    pub async fn set_audio(&self, enabled: bool) -> Result<(), NegotiationError> {
        self.send(UserCommand::SetAudio(enabled)).await
    }

    /// # Errors
    ///
    /// `DriverStopped` once the driver task has exited.
    pub async fn set_video(&self, enabled: bool) -> Result<(), NegotiationError> {
        self.send(UserCommand::SetVideo(enabled)).await
    }

    /// # Errors
    ///
    /// `DriverStopped` once the driver task has exited.
    pub async fn leave(&self) -> Result<(), NegotiationError> {
        self.send(UserCommand::Leave).await
    }

    /// Stop the driver. Devices are released and links closed first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Task that owns one engine and one backend.
pub struct PeerDriver<B> {
    engine: NegotiationEngine,
    backend: B,
    channels: DriverChannels,
    commands: mpsc::Receiver<UserCommand>,
    cancel_token: CancellationToken,
}

impl<B: MediaBackend + 'static> PeerDriver<B> {
    /// Start the driver. Local media is requested immediately.
    pub fn spawn(
        engine: NegotiationEngine,
        backend: B,
        channels: DriverChannels,
        cancel_token: CancellationToken,
    ) -> (DriverHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let local_id = engine.local_id().clone();

        let driver = Self {
            engine,
            backend,
            channels,
            commands: rx,
            cancel_token: cancel_token.clone(),
        };
        let span = tracing::info_span!("peer_driver", local_id = %local_id);
        let task = tokio::spawn(driver.run().instrument(span));

        (
            DriverHandle {
                commands: tx,
                cancel_token,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!(target: "negotiation.driver", "Peer driver started");
        self.engine.start_local_media();
        self.flush().await;

        loop {
            let deadline = self.engine.next_deadline();
            let keep_going = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "negotiation.driver", "Peer driver cancelled");
                    self.engine.leave();
                    false
                }
                message = self.channels.inbound.recv() => match message {
                    Some(message) => {
                        self.engine.handle_server_message(&message);
                        !message.is_fatal()
                    }
                    None => {
                        info!(target: "negotiation.driver", "Signaling channel closed");
                        self.engine.leave();
                        false
                    }
                },
                Some(event) = self.channels.backend_events.recv() => {
                    self.on_backend_event(event);
                    true
                }
                Some(command) = self.commands.recv() => self.on_user_command(command),
                () = sleep_until(deadline) => {
                    self.engine.poll_timers(Instant::now());
                    true
                }
            };
            self.flush().await;
            if !keep_going {
                break;
            }
        }

        info!(target: "negotiation.driver", "Peer driver stopped");
    }

    fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::LocalCandidate {
                peer,
                generation,
                candidate,
            } => self.engine.local_candidate(&peer, generation, candidate),
            BackendEvent::TransportStateChanged {
                peer,
                generation,
                state,
            } => {
                debug!(
                    target: "negotiation.driver",
                    peer = %peer,
                    state = state.as_str(),
                    "Transport state changed"
                );
                self.engine
                    .transport_state_changed(&peer, generation, state, Instant::now());
            }
            BackendEvent::CaptureEnded { track } => self.engine.capture_ended(&track),
        }
    }

    /// Returns false when the driver should stop.
    fn on_user_command(&mut self, command: UserCommand) -> bool {
        match command {
            UserCommand::SetAudio(enabled) => self.engine.set_audio_enabled(enabled),
            UserCommand::SetVideo(enabled) => self.engine.set_video_enabled(enabled),
            UserCommand::StartScreenShare { with_audio } => {
                self.engine.start_screen_capture(with_audio);
            }
            UserCommand::StopScreenShare => self.engine.stop_screen_capture(),
            UserCommand::Leave => {
                self.engine.leave();
                return false;
            }
        }
        true
    }

    /// Carry out every queued action, including the ones completions add.
    async fn flush(&mut self) {
        while self.engine.has_pending_actions() {
            for action in self.engine.drain_actions() {
                match action {
                    Action::Execute(command) => self.execute(command).await,
                    Action::Send(message) => {
                        if self.channels.outbound.send(message).await.is_err() {
                            warn!(target: "negotiation.driver", "Signaling channel closed, dropping message");
                        }
                    }
                    Action::Notify(event) => {
                        if self.channels.app_events.send(event).await.is_err() {
                            debug!(target: "negotiation.driver", "No listener for engine events");
                        }
                    }
                }
            }
        }
    }

    async fn execute(&mut self, command: Command) {
        let operation = command.name();
        match command {
            Command::CreateLink {
                peer,
                generation,
                transport,
            } => {
                let result = self.backend.create_link(&peer, generation, &transport).await;
                self.check(&peer, generation, operation, result);
            }
            Command::CloseLink { peer, .. } => {
                if let Err(e) = self.backend.close_link(&peer).await {
                    debug!(target: "negotiation.driver", peer = %peer, error = %e, "Close failed");
                }
            }
            Command::CreateOffer {
                peer,
                generation,
                ice_restart,
            } => match self.backend.create_offer(&peer, ice_restart).await {
                Ok(sdp) => self.engine.offer_created(&peer, generation, sdp),
                Err(e) => self.fail(&peer, generation, operation, &e),
            },
            Command::CreateAnswer { peer, generation } => {
                match self.backend.create_answer(&peer).await {
                    Ok(sdp) => self.engine.answer_created(&peer, generation, sdp),
                    Err(e) => self.fail(&peer, generation, operation, &e),
                }
            }
            Command::ApplyRemoteDescription {
                peer,
                generation,
                kind,
                sdp,
            } => match self.backend.apply_remote_description(&peer, kind, &sdp).await {
                Ok(()) => self.engine.remote_description_applied(&peer, generation, kind),
                Err(e) => self.fail(&peer, generation, operation, &e),
            },
            Command::Rollback { peer, generation } => {
                let result = self.backend.rollback(&peer).await;
                self.check(&peer, generation, operation, result);
            }
            Command::AddCandidate {
                peer,
                generation,
                candidate,
            } => {
                let result = self.backend.add_candidate(&peer, &candidate).await;
                self.check(&peer, generation, operation, result);
            }
            Command::AddTrack {
                peer,
                generation,
                slot,
                track,
            } => {
                let result = self.backend.add_track(&peer, slot, &track).await;
                self.check(&peer, generation, operation, result);
            }
            Command::ReplaceTrack {
                peer,
                generation,
                slot,
                track,
            } => {
                let result = self.backend.replace_track(&peer, slot, track.as_ref()).await;
                self.check(&peer, generation, operation, result);
            }
            Command::RemoveTrack {
                peer,
                generation,
                slot,
            } => {
                let result = self.backend.remove_track(&peer, slot).await;
                self.check(&peer, generation, operation, result);
            }
            Command::Acquire(source) => match self.backend.acquire(source).await {
                Ok(tracks) => self.engine.media_acquired(source, tracks),
                Err(e) => self.engine.media_unavailable(source, &e.to_string()),
            },
            Command::SetTrackEnabled { track, enabled } => {
                if let Err(e) = self.backend.set_track_enabled(&track, enabled).await {
                    warn!(target: "negotiation.driver", track = %track, error = %e, "Set enabled failed");
                }
            }
            Command::StopTrack(track) => {
                if let Err(e) = self.backend.stop_track(&track).await {
                    debug!(target: "negotiation.driver", track = %track, error = %e, "Stop failed");
                }
            }
        }
    }

    fn check(
        &mut self,
        peer: &ConnectionId,
        generation: u64,
        operation: &str,
        result: Result<(), BackendError>,
    ) {
        if let Err(e) = result {
            self.fail(peer, generation, operation, &e);
        }
    }

    fn fail(&mut self, peer: &ConnectionId, generation: u64, operation: &str, error: &BackendError) {
        self.engine
            .operation_failed(peer, generation, operation, &error.to_string());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::NegotiationConfig;
    use signaling_protocol::messages::{InboundDescription, InitiateConnection};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeBackend {
        calls: Arc<Mutex<Vec<String>>>,
        offers: u32,
        no_camera: bool,
    }

    impl FakeBackend {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaBackend for FakeBackend {
        async fn create_link(
            &mut self,
            peer: &ConnectionId,
            generation: u64,
            _transport: &TransportConfig,
        ) -> Result<(), BackendError> {
            self.record(format!("create-link:{peer}:{generation}"));
            Ok(())
        }

        async fn close_link(&mut self, peer: &ConnectionId) -> Result<(), BackendError> {
            self.record(format!("close-link:{peer}"));
            Ok(())
        }

        async fn create_offer(&mut self, peer: &ConnectionId, ice_restart: bool) -> Result<String, BackendError> {
            self.offers += 1;
            self.record(format!("create-offer:{peer}:{ice_restart}"));
            Ok(format!("offer-{}", self.offers))
        }

        async fn create_answer(&mut self, peer: &ConnectionId) -> Result<String, BackendError> {
            self.record(format!("create-answer:{peer}"));
            Ok("answer".to_string())
        }

        async fn apply_remote_description(
            &mut self,
            peer: &ConnectionId,
            kind: SdpKind,
            _sdp: &str,
        ) -> Result<(), BackendError> {
            self.record(format!("apply:{peer}:{kind:?}"));
            Ok(())
        }

        async fn rollback(&mut self, peer: &ConnectionId) -> Result<(), BackendError> {
            self.record(format!("rollback:{peer}"));
            Ok(())
        }

        async fn add_candidate(&mut self, peer: &ConnectionId, candidate: &IceCandidate) -> Result<(), BackendError> {
            self.record(format!("add-candidate:{peer}:{}", candidate.candidate));
            Ok(())
        }

        async fn add_track(&mut self, peer: &ConnectionId, slot: TrackSlot, track: &TrackId) -> Result<(), BackendError> {
            self.record(format!("add-track:{peer}:{}:{track}", slot.as_str()));
            Ok(())
        }

        async fn replace_track(
            &mut self,
            peer: &ConnectionId,
            slot: TrackSlot,
            _track: Option<&TrackId>,
        ) -> Result<(), BackendError> {
            self.record(format!("replace-track:{peer}:{}", slot.as_str()));
            Ok(())
        }

        async fn remove_track(&mut self, peer: &ConnectionId, slot: TrackSlot) -> Result<(), BackendError> {
            self.record(format!("remove-track:{peer}:{}", slot.as_str()));
            Ok(())
        }

        async fn acquire(&mut self, source: MediaSource) -> Result<AcquiredTracks, BackendError> {
            match source {
                MediaSource::Microphone => Ok(AcquiredTracks::audio("mic")),
                MediaSource::Camera if self.no_camera => {
                    Err(BackendError::DeviceUnavailable("no camera".into()))
                }
                MediaSource::Camera => Ok(AcquiredTracks::video("cam")),
                MediaSource::Screen { .. } => Ok(AcquiredTracks::video("screen")),
            }
        }

        async fn set_track_enabled(&mut self, track: &TrackId, enabled: bool) -> Result<(), BackendError> {
            self.record(format!("set-enabled:{track}:{enabled}"));
            Ok(())
        }

        async fn stop_track(&mut self, track: &TrackId) -> Result<(), BackendError> {
            self.record(format!("stop-track:{track}"));
            Ok(())
        }
    }

    struct Wiring {
        handle: DriverHandle,
        task: JoinHandle<()>,
        inbound: mpsc::Sender<ServerMessage>,
        outbound: mpsc::Receiver<ClientMessage>,
        backend_events: mpsc::Sender<BackendEvent>,
        app_events: mpsc::Receiver<EngineEvent>,
    }

    fn start(local: &str, backend: FakeBackend) -> Wiring {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let (app_tx, app_rx) = mpsc::channel(64);
        let engine = NegotiationEngine::new(ConnectionId::from(local), NegotiationConfig::default());
        let (handle, task) = PeerDriver::spawn(
            engine,
            backend,
            DriverChannels {
                inbound: inbound_rx,
                outbound: outbound_tx,
                backend_events: events_rx,
                app_events: app_tx,
            },
            CancellationToken::new(),
        );
        Wiring {
            handle,
            task,
            inbound: inbound_tx,
            outbound: outbound_rx,
            backend_events: events_tx,
            app_events: app_rx,
        }
    }

    async fn next_sent(wiring: &mut Wiring) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(30), wiring.outbound.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("driver dropped outbound channel")
    }

    fn initiate(target: &str) -> ServerMessage {
        ServerMessage::InitiateConnection(InitiateConnection {
            target_id: ConnectionId::from(target),
            should_create_offer: true,
            transport_config: TransportConfig::default(),
        })
    }

    #[tokio::test]
    async fn test_offer_and_answer_through_backend() {
        let backend = FakeBackend::default();
        let mut wiring = start("a", backend.clone());

        wiring.inbound.send(initiate("b")).await.unwrap();
        let offer = next_sent(&mut wiring).await;
        assert!(matches!(&offer, ClientMessage::Offer(d) if d.sdp == "offer-1" && !d.ice_restart));

        wiring
            .inbound
            .send(ServerMessage::Answer(InboundDescription {
                sender: ConnectionId::from("b"),
                sdp: "answer".into(),
                ice_restart: false,
            }))
            .await
            .unwrap();
        // Queued messages are drained before the closed channel is seen.
        drop(wiring.inbound);
        wiring.task.await.unwrap();

        let calls = backend.calls();
        assert!(calls.contains(&"add-track:b:microphone:mic".to_string()));
        assert!(calls.contains(&"add-track:b:video:cam".to_string()));
        assert!(calls.contains(&"apply:b:Answer".to_string()));
        assert!(calls.contains(&"stop-track:mic".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_grace_elapses_into_ice_restart() {
        let mut wiring = start("a", FakeBackend::default());
        wiring.inbound.send(initiate("b")).await.unwrap();
        assert!(matches!(next_sent(&mut wiring).await, ClientMessage::Offer(_)));
        wiring
            .inbound
            .send(ServerMessage::Answer(InboundDescription {
                sender: ConnectionId::from("b"),
                sdp: "answer".into(),
                ice_restart: false,
            }))
            .await
            .unwrap();

        let started = Instant::now();
        wiring
            .backend_events
            .send(BackendEvent::TransportStateChanged {
                peer: ConnectionId::from("b"),
                generation: 1,
                state: TransportState::Disconnected,
            })
            .await
            .unwrap();
        assert!(matches!(
            next_sent(&mut wiring).await,
            ClientMessage::ConnectionStateChange(c) if c.state == TransportState::Disconnected
        ));

        let restart = next_sent(&mut wiring).await;
        assert!(matches!(&restart, ClientMessage::Offer(d) if d.ice_restart));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_camera_is_reported_not_fatal() {
        let backend = FakeBackend {
            no_camera: true,
            ..FakeBackend::default()
        };
        let mut wiring = start("a", backend);

        let event = tokio::time::timeout(Duration::from_secs(5), wiring.app_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            EngineEvent::MediaUnavailable { source: MediaSource::Camera, .. }
        ));

        wiring.inbound.send(initiate("b")).await.unwrap();
        assert!(matches!(next_sent(&mut wiring).await, ClientMessage::Offer(_)));
    }

    #[tokio::test]
    async fn test_leave_stops_driver_and_releases_devices() {
        let backend = FakeBackend::default();
        let wiring = start("a", backend.clone());

        wiring.handle.leave().await.unwrap();
        wiring.task.await.unwrap();

        let calls = backend.calls();
        assert!(calls.contains(&"stop-track:mic".to_string()));
        assert!(calls.contains(&"stop-track:cam".to_string()));
        assert!(wiring.handle.set_audio(false).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_signaling_ends_driver() {
        let wiring = start("a", FakeBackend::default());

        drop(wiring.inbound);

        wiring.task.await.unwrap();
    }
}

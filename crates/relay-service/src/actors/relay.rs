//! `RelayActor`: the single owner of meeting state.
//!
//! - One per process
//! - Owns the [`SignalingRelay`] and the table of live connection handles
//! - Runs the heartbeat sweep on a fixed interval
//! - Owns the root `CancellationToken`; connection actors get child tokens
//!
//! Every registry mutation happens on this task, so all operations on a
//! meeting are linearized. Deliveries go out with `try_send` and never
//! block the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::types::{ConnectionId, MeetingId};
use signaling_protocol::messages::Connected;
use signaling_protocol::ServerMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::ConnectionHandle;
use super::messages::{RelayMessage, RelayStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::RelayError;
use crate::relay::{MeetingInfo, Outbox, RelaySettings, SignalingRelay};

const RELAY_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `RelayActor`.
#[derive(Clone, Debug)]
pub struct RelayActorHandle {
    sender: mpsc::Sender<RelayMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RelayActorHandle {
    /// Spawn the relay actor and return a handle to it.
    #[must_use]
    pub fn new(
        relay_id: String,
        settings: RelaySettings,
        health_check_interval: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Relay, relay_id.as_str()));

        let actor = RelayActor {
            relay_id,
            relay: SignalingRelay::new(settings),
            receiver,
            cancel_token: cancel_token.clone(),
            connections: HashMap::new(),
            accepting_new: true,
            health_check_interval,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn send(&self, message: RelayMessage) -> Result<(), RelayError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RelayMessage,
    ) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(message(tx)).await?;
        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a new socket. The relay greets it with `connected`.
    ///
    /// # Errors
    ///
    /// `Draining` once shutdown has begun.
    pub async fn connect(&self, handle: ConnectionHandle) -> Result<(), RelayError> {
        self.request(|respond_to| RelayMessage::Connect { handle, respond_to })
            .await?
    }

    /// Forward one text frame read from `connection_id`.
    ///
    /// # Errors
    ///
    /// `Internal` if the relay actor has stopped.
    pub async fn inbound(&self, connection_id: ConnectionId, frame: String) -> Result<(), RelayError> {
        self.send(RelayMessage::Inbound {
            connection_id,
            frame,
        })
        .await
    }

    /// # Errors
    ///
    /// `Internal` if the relay actor has stopped.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        self.send(RelayMessage::Disconnect { connection_id }).await
    }

    /// # Errors
    ///
    /// `Internal` if the relay actor has stopped.
    pub async fn meeting_info(&self, meeting_id: MeetingId) -> Result<Option<MeetingInfo>, RelayError> {
        self.request(|respond_to| RelayMessage::GetMeetingInfo {
            meeting_id,
            respond_to,
        })
        .await
    }

    /// # Errors
    ///
    /// `Internal` if the relay actor has stopped.
    pub async fn status(&self) -> Result<RelayStatus, RelayError> {
        self.request(|respond_to| RelayMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting sockets and ask every open one to close.
    ///
    /// # Errors
    ///
    /// `Internal` if the relay actor has stopped.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.request(|respond_to| RelayMessage::Shutdown { respond_to })
            .await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for connection actors and servers that must stop with the relay.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct RelayActor {
    relay_id: String,
    relay: SignalingRelay,
    receiver: mpsc::Receiver<RelayMessage>,
    cancel_token: CancellationToken,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    accepting_new: bool,
    health_check_interval: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RelayActor {
    #[instrument(skip_all, name = "relay.actor.relay", fields(relay_id = %self.relay_id))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.relay",
            relay_id = %self.relay_id,
            "RelayActor started"
        );

        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.health_check_interval,
            self.health_check_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.relay",
                        relay_id = %self.relay_id,
                        "RelayActor received cancellation signal"
                    );
                    self.close_all("server shutting down").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(
                            target: "relay.actor.relay",
                            relay_id = %self.relay_id,
                            "RelayActor channel closed, exiting"
                        );
                        break;
                    };
                    self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    self.metrics.record_message_processed();
                }

                _ = sweep.tick() => {
                    let out = self.relay.health_sweep(Instant::now());
                    self.deliver(out);
                }
            }
        }

        info!(
            target: "relay.actor.relay",
            relay_id = %self.relay_id,
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RelayActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Connect { handle, respond_to } => {
                let result = self.connect(handle);
                let _ = respond_to.send(result);
            }

            RelayMessage::Inbound {
                connection_id,
                frame,
            } => {
                if !self.connections.contains_key(&connection_id) {
                    debug!(
                        target: "relay.actor.relay",
                        connection_id = %connection_id,
                        "Frame from unregistered connection ignored"
                    );
                    return;
                }
                let out = self
                    .relay
                    .handle_frame(&connection_id, &frame, Instant::now());
                self.deliver(out);
            }

            RelayMessage::Disconnect { connection_id } => {
                self.disconnect(&connection_id);
            }

            RelayMessage::GetMeetingInfo {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.relay.meeting_info(&meeting_id));
            }

            RelayMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            RelayMessage::Shutdown { respond_to } => {
                info!(
                    target: "relay.actor.relay",
                    relay_id = %self.relay_id,
                    connections = self.connections.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.close_all("server shutting down").await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn connect(&mut self, handle: ConnectionHandle) -> Result<(), RelayError> {
        if !self.accepting_new {
            return Err(RelayError::Draining);
        }
        let connection_id = handle.connection_id().clone();
        handle.try_deliver(Arc::new(ServerMessage::Connected(Connected {
            connection_id: connection_id.clone(),
        })));
        if let Some(previous) = self.connections.insert(connection_id.clone(), handle) {
            previous.cancel();
        } else {
            self.metrics.connection_opened();
        }

        debug!(
            target: "relay.actor.relay",
            connection_id = %connection_id,
            total_connections = self.connections.len(),
            "Connection registered"
        );
        Ok(())
    }

    fn disconnect(&mut self, connection_id: &ConnectionId) {
        let Some(handle) = self.connections.remove(connection_id) else {
            return;
        };
        handle.cancel();
        self.metrics.connection_closed();

        let out = self.relay.disconnect(connection_id);
        self.deliver(out);
    }

    fn status(&self) -> RelayStatus {
        RelayStatus {
            relay_id: self.relay_id.clone(),
            meetings: self.relay.registry().meeting_count(),
            participants: self.relay.registry().participant_count(),
            connections: self.connections.len(),
            accepting_new: self.accepting_new,
        }
    }

    /// Hand each delivery to its connection, in order. Recipients that are
    /// already gone are skipped.
    fn deliver(&self, out: Outbox) {
        for delivery in out {
            match self.connections.get(&delivery.to) {
                Some(handle) => {
                    handle.try_deliver(delivery.message);
                }
                None => debug!(
                    target: "relay.actor.relay",
                    connection_id = %delivery.to,
                    event = delivery.message.event_name(),
                    "Recipient no longer connected"
                ),
            }
        }
    }

    async fn close_all(&self, reason: &str) {
        for handle in self.connections.values() {
            if handle.close(reason).await.is_err() {
                handle.cancel();
            }
        }
    }
}

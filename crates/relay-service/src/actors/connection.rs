//! `ConnectionActor`: one per signaling socket.
//!
//! Owns the outbound half of a socket. The relay actor pushes deliveries
//! with [`ConnectionHandle::try_deliver`], which never waits; the actor
//! encodes them to JSON in arrival order and hands frames to the socket
//! writer.

use std::sync::Arc;

use common::types::ConnectionId;
use signaling_protocol::{encode_server_message, ServerMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::messages::{ConnectionMessage, OutboundFrame};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::RelayError;

/// Outbound mailbox capacity. A peer this far behind starts losing messages.
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Queue a message without waiting. Returns false if it was dropped.
    pub fn try_deliver(&self, message: Arc<ServerMessage>) -> bool {
        match self.sender.try_send(ConnectionMessage::Deliver { message }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    "Delivery to closed connection skipped"
                );
                false
            }
        }
    }

    /// Ask the actor to send a close frame and stop.
    ///
    /// # Errors
    ///
    /// `Internal` if the actor is already gone.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), RelayError> {
        self.sender
            .send(ConnectionMessage::Close {
                reason: reason.into(),
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }
}

pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActor {
    /// Spawn the actor. Frames for the socket come out of `outbound`.
    pub fn spawn(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<OutboundFrame>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.as_str(),
        ));

        let actor = Self {
            connection_id: connection_id.clone(),
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };
        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
        };
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "relay.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                biased;

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        debug!(
                            target: "relay.actor.connection",
                            connection_id = %self.connection_id,
                            "ConnectionActor channel closed, exiting"
                        );
                        break;
                    };
                    let should_exit = self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    self.metrics.record_message_processed();
                    if should_exit {
                        break;
                    }
                }

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }
            }
        }

        info!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { message } => {
                let text = match encode_server_message(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "relay.actor.connection",
                            connection_id = %self.connection_id,
                            event = message.event_name(),
                            error = %e,
                            "Failed to encode server message"
                        );
                        return false;
                    }
                };
                if self.outbound.send(OutboundFrame::Text(text)).await.is_err() {
                    debug!(
                        target: "relay.actor.connection",
                        connection_id = %self.connection_id,
                        "Socket writer gone"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                let _ = self.outbound.send(OutboundFrame::Close { reason }).await;
                true
            }
        }
    }
}

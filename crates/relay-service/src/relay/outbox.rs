//! Ordered deliveries produced by one relay step.

use std::sync::Arc;

use common::types::ConnectionId;
use signaling_protocol::ServerMessage;

/// One message addressed to one connection.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub to: ConnectionId,
    pub message: Arc<ServerMessage>,
}

/// Messages to send, in the order they must be sent.
///
/// Broadcasts share one allocation across recipients.
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for a single connection.
    pub fn send(&mut self, to: &ConnectionId, message: ServerMessage) {
        self.deliveries.push(Delivery {
            to: to.clone(),
            message: Arc::new(message),
        });
    }

    /// Queue the same message for every recipient.
    pub fn broadcast<'a>(
        &mut self,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        message: ServerMessage,
    ) {
        let message = Arc::new(message);
        for to in recipients {
            self.deliveries.push(Delivery {
                to: to.clone(),
                message: Arc::clone(&message),
            });
        }
    }

    /// Queue a message for every recipient except `sender`.
    pub fn broadcast_except<'a>(
        &mut self,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        sender: &ConnectionId,
        message: ServerMessage,
    ) {
        self.broadcast(recipients.into_iter().filter(|c| *c != sender), message);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    #[must_use]
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Messages addressed to `conn`, in delivery order.
    #[must_use]
    pub fn messages_for(&self, conn: &ConnectionId) -> Vec<&ServerMessage> {
        self.deliveries
            .iter()
            .filter(|d| &d.to == conn)
            .map(|d| d.message.as_ref())
            .collect()
    }

    /// Event names addressed to `conn`, in delivery order.
    #[must_use]
    pub fn events_for(&self, conn: &ConnectionId) -> Vec<&'static str> {
        self.messages_for(conn)
            .into_iter()
            .map(ServerMessage::event_name)
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.deliveries.clear();
    }
}

impl IntoIterator for Outbox {
    type Item = Delivery;
    type IntoIter = std::vec::IntoIter<Delivery>;

    fn into_iter(self) -> Self::IntoIter {
        self.deliveries.into_iter()
    }
}

//! WebSocket signaling transport.
//!
//! The socket is split in two. The read half forwards text frames to the
//! relay actor in arrival order; the write half drains frames produced by
//! the connection's `ConnectionActor`. A writer that stops cancels the
//! connection token, so the reader stops too and the relay runs disconnect
//! handling either way.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::actors::{ActorType, ConnectionActor, OutboundFrame};
use crate::routes::AppState;

/// Frames buffered between the connection actor and the socket writer.
const OUTBOUND_FRAME_BUFFER: usize = 64;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "relay.transport.ws", fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = ConnectionId::generate();
    tracing::Span::current().record("connection_id", tracing::field::display(&connection_id));

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_FRAME_BUFFER);
    let token = state.relay.child_token();
    let (handle, actor_task) = ConnectionActor::spawn(
        connection_id.clone(),
        out_tx,
        token.clone(),
        Arc::clone(&state.metrics),
    );

    if let Err(e) = state.relay.connect(handle).await {
        warn!(
            target: "relay.transport.ws",
            connection_id = %connection_id,
            error = %e,
            "Relay refused connection"
        );
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: e.client_message().into(),
            })))
            .await;
        token.cancel();
        return;
    }

    info!(
        target: "relay.transport.ws",
        connection_id = %connection_id,
        "Signaling socket opened"
    );

    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close { reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        writer_token.cancel();
    });

    loop {
        tokio::select! {
            () = token.cancelled() => break,

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if state.relay.inbound(connection_id.clone(), text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "relay.transport.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Socket read failed"
                    );
                    break;
                }
            },
        }
    }

    let _ = state.relay.disconnect(connection_id.clone()).await;
    token.cancel();

    if let Err(e) = actor_task.await {
        if e.is_panic() {
            state.metrics.record_panic(ActorType::Connection);
        }
    }
    let _ = writer.await;

    info!(
        target: "relay.transport.ws",
        connection_id = %connection_id,
        "Signaling socket closed"
    );
}

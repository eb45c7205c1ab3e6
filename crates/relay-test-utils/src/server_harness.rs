//! Test server harness for end-to-end tests.
//!
//! Provides `TestRelayServer` for spawning a real relay on a random port and
//! `WsTestClient` for talking to it over a WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use relay_service::actors::{ActorMetrics, RelayActorHandle};
use relay_service::relay::RelaySettings;
use relay_service::routes::{build_routes, AppState};
use signaling_protocol::{
    decode_server_message, encode_client_message, ClientMessage, ServerMessage,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a client waits for the next server message.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay server listening on `127.0.0.1` with a random port.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_connect() -> anyhow::Result<()> {
///     let server = TestRelayServer::spawn().await?;
///     let client = WsTestClient::connect(&server.ws_url()).await?;
///     assert!(!client.connection_id().as_str().is_empty());
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    relay: RelayActorHandle,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a server with default relay settings.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(RelaySettings::default(), Duration::from_secs(30)).await
    }

    /// Spawn a server with explicit relay settings and sweep interval.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound.
    pub async fn spawn_with(
        settings: RelaySettings,
        health_check_interval: Duration,
    ) -> anyhow::Result<Self> {
        let transport = settings.transport.clone();
        let metrics = ActorMetrics::new();
        let relay = RelayActorHandle::new(
            "relay-test".to_string(),
            settings,
            health_check_interval,
            Arc::clone(&metrics),
        );

        let app = build_routes(Arc::new(AppState {
            relay: relay.clone(),
            metrics,
            transport,
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let addr = listener.local_addr()?;

        let token = relay.child_token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });

        Ok(Self {
            addr,
            relay,
            _handle: handle,
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    #[must_use]
    pub fn relay(&self) -> &RelayActorHandle {
        &self.relay
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        self.relay.cancel();
    }
}

/// A WebSocket client that speaks the signaling protocol.
pub struct WsTestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connection_id: ConnectionId,
}

impl WsTestClient {
    /// Connect and wait for the `connected` greeting.
    ///
    /// # Errors
    ///
    /// Fails if the handshake fails or the first frame is not `connected`.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        let mut client = Self {
            stream,
            connection_id: ConnectionId::from(""),
        };
        match client.recv().await? {
            ServerMessage::Connected(connected) => {
                client.connection_id = connected.connection_id;
                Ok(client)
            }
            other => bail!("expected connected, got {}", other.event_name()),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// # Errors
    ///
    /// Fails if the message cannot be encoded or the socket is closed.
    pub async fn send(&mut self, message: &ClientMessage) -> anyhow::Result<()> {
        let text = encode_client_message(message)?;
        self.send_text(text).await
    }

    /// Send a raw text frame, valid or not.
    ///
    /// # Errors
    ///
    /// Fails if the socket is closed.
    pub async fn send_text(&mut self, text: impl Into<String>) -> anyhow::Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Next server message, skipping control frames.
    ///
    /// # Errors
    ///
    /// Fails on timeout, close, or an undecodable frame.
    pub async fn recv(&mut self) -> anyhow::Result<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .context("timed out waiting for server message")?
                .ok_or_else(|| anyhow!("socket closed"))??;
            match frame {
                Message::Text(text) => return Ok(decode_server_message(&text)?),
                Message::Close(frame) => bail!("socket closed by server: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Skip messages until one named `event` arrives.
    ///
    /// # Errors
    ///
    /// Fails as [`WsTestClient::recv`] does.
    pub async fn recv_event(&mut self, event: &str) -> anyhow::Result<ServerMessage> {
        loop {
            let message = self.recv().await?;
            if message.event_name() == event {
                return Ok(message);
            }
        }
    }

    /// Wait until the server closes the socket.
    ///
    /// # Errors
    ///
    /// Fails on timeout.
    pub async fn expect_close(&mut self) -> anyhow::Result<()> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .context("timed out waiting for close")?;
            match frame {
                None | Some(Ok(Message::Close(_)) | Err(_)) => return Ok(()),
                Some(Ok(_)) => {}
            }
        }
    }

    /// # Errors
    ///
    /// Fails if the close frame cannot be sent.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

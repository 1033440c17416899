use crate::core::errors::IngestError;
use crate::core::kernel::codec::WsCodec;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{instrument, warn};

/// WebSocket transport trait - pure transport layer
///
/// Session logic lives above this seam; implementations only move typed
/// frames across a socket. Tests substitute an in-memory implementation.
#[async_trait]
pub trait WsTransport<C: WsCodec>: Send {
    /// Establish the underlying connection.
    async fn connect(&mut self) -> Result<(), IngestError>;

    /// Encode and send one outbound frame.
    async fn send(&mut self, frame: &C::Outbound) -> Result<(), IngestError>;

    /// Receive the next batch of decoded inbound frames.
    ///
    /// `None` means the peer closed the connection in an orderly fashion.
    async fn next(&mut self) -> Option<Result<Vec<C::Inbound>, IngestError>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), IngestError>;

    /// Check if the connection is alive
    fn is_connected(&self) -> bool;
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Tungstenite-based WebSocket transport
pub struct TungsteniteWs<C> {
    url: String,
    /// Connection id, used only for logging/tracing.
    peer_name: String,
    codec: C,
    connect_timeout: Duration,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    connected: bool,
}

impl<C: WsCodec> TungsteniteWs<C> {
    #[must_use]
    pub fn new(url: String, peer_name: String, codec: C) -> Self {
        Self {
            url,
            peer_name,
            codec,
            connect_timeout: Duration::from_secs(10),
            write: None,
            read: None,
            connected: false,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), IngestError> {
        let write = self.write.as_mut().ok_or_else(|| {
            IngestError::TransportFailure("WebSocket write stream not available".to_string())
        })?;

        write.send(msg).await.map_err(|e| {
            self.connected = false;
            IngestError::TransportFailure(format!("Failed to send WebSocket message: {}", e))
        })
    }
}

#[async_trait]
impl<C: WsCodec> WsTransport<C> for TungsteniteWs<C> {
    #[instrument(skip(self), fields(connection = %self.peer_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), IngestError> {
        let connection_future = tokio::time::timeout(self.connect_timeout, connect_async(&self.url));

        let (ws_stream, _) = connection_future
            .await
            .map_err(|_| IngestError::ConnectionTimeout("WebSocket connection timeout".to_string()))?
            .map_err(|e| IngestError::TransportFailure(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;

        Ok(())
    }

    #[instrument(skip(self, frame), fields(connection = %self.peer_name))]
    async fn send(&mut self, frame: &C::Outbound) -> Result<(), IngestError> {
        if !self.connected {
            return Err(IngestError::TransportFailure(
                "WebSocket not connected".to_string(),
            ));
        }

        let msg = self.codec.encode(frame)?;
        self.send_raw(msg).await
    }

    #[instrument(skip(self), fields(connection = %self.peer_name))]
    async fn next(&mut self) -> Option<Result<Vec<C::Inbound>, IngestError>> {
        loop {
            if !self.connected {
                return None;
            }

            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(message)) => match message {
                    Message::Close(_) => {
                        self.connected = false;
                        return None;
                    }
                    // Transport-level liveness is answered here; the
                    // protocol-level ping/pong frames are ordinary data.
                    Message::Ping(data) => {
                        if let Err(e) = self.send_raw(Message::Pong(data)).await {
                            warn!("Failed to send pong response: {}", e);
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    data => match self.codec.decode(data) {
                        Ok(frames) if frames.is_empty() => {}
                        Ok(frames) => return Some(Ok(frames)),
                        Err(e) => return Some(Err(e)),
                    },
                },
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(IngestError::TransportFailure(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(connection = %self.peer_name))]
    async fn close(&mut self) -> Result<(), IngestError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

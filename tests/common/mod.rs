//! Shared test fixtures: an in-process mock hub speaking the wire
//! protocol over a real WebSocket, plus a capturing sink.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hublink::core::errors::IngestError;
use hublink::core::traits::EventSink;
use hublink::core::types::StateChange;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

pub const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Token the hub accepts; anything else gets `auth_invalid`.
    pub token: String,
    /// Reply to protocol pings with pongs.
    pub answer_pings: bool,
    /// Acknowledge correlated commands (subscribe etc.) with success.
    pub answer_commands: bool,
    /// Drop the socket right after acknowledging a subscription.
    pub disconnect_after_subscribe: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            token: TEST_TOKEN.to_string(),
            answer_pings: true,
            answer_commands: true,
            disconnect_after_subscribe: false,
        }
    }
}

/// Scripted hub endpoint for a test to connect against.
pub struct MockHub {
    pub url: String,
    connections: Arc<AtomicUsize>,
    /// Raw text frames broadcast verbatim to every live connection.
    raw_tx: broadcast::Sender<String>,
    /// Every JSON frame received from any client.
    inbound_tx: broadcast::Sender<Value>,
}

impl MockHub {
    pub async fn spawn(options: HubOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock hub");
        let addr = listener.local_addr().expect("mock hub addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let (raw_tx, _) = broadcast::channel(64);
        let (inbound_tx, _) = broadcast::channel(256);

        let accept_connections = Arc::clone(&connections);
        let accept_raw = raw_tx.clone();
        let accept_inbound = inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    stream,
                    options.clone(),
                    accept_raw.subscribe(),
                    accept_inbound.clone(),
                ));
            }
        });

        Self {
            url: format!("ws://{addr}/api/websocket"),
            connections,
            raw_tx,
            inbound_tx,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a raw text frame to every live connection.
    pub fn send_raw(&self, text: String) {
        let _ = self.raw_tx.send(text);
    }

    /// Wrap a `state_changed` payload in an event frame for subscription 1
    /// and deliver it.
    pub fn send_state_changed(&self, data: Value) {
        self.send_raw(
            json!({
                "id": 1,
                "type": "event",
                "event": {
                    "event_type": "state_changed",
                    "data": data,
                    "time_fired": "2024-06-01T12:00:00+00:00",
                },
            })
            .to_string(),
        );
    }

    /// Observe frames arriving from clients.
    pub fn inbound(&self) -> broadcast::Receiver<Value> {
        self.inbound_tx.subscribe()
    }
}

async fn handle_connection(
    stream: TcpStream,
    options: HubOptions,
    mut raw_rx: broadcast::Receiver<String>,
    inbound_tx: broadcast::Sender<Value>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    let greeting = json!({"type": "auth_required", "ha_version": "2024.6.0"});
    if ws.send(Message::Text(greeting.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                let Ok(text) = raw else { continue };
                if ws.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }

            message = ws.next() => {
                let frame = match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(frame) => frame,
                            Err(_) => continue,
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => return,
                };
                let _ = inbound_tx.send(frame.clone());

                let frame_type = frame["type"].as_str().unwrap_or_default().to_string();
                match frame_type.as_str() {
                    "auth" => {
                        let reply = if frame["access_token"] == json!(options.token) {
                            json!({"type": "auth_ok", "ha_version": "2024.6.0"})
                        } else {
                            json!({"type": "auth_invalid", "message": "Invalid access token"})
                        };
                        let invalid = reply["type"] == "auth_invalid";
                        if ws.send(Message::Text(reply.to_string())).await.is_err() || invalid {
                            return;
                        }
                    }
                    "ping" => {
                        if options.answer_pings {
                            let reply = json!({"id": frame["id"], "type": "pong"});
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    "pong" => {}
                    _ => {
                        if options.answer_commands && frame["id"].is_u64() {
                            let reply = json!({
                                "id": frame["id"],
                                "type": "result",
                                "success": true,
                                "result": null,
                            });
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                        if frame_type == "subscribe_events" && options.disconnect_after_subscribe {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Sink forwarding every delivered event to a channel for assertions.
pub struct CaptureSink {
    name: String,
    tx: mpsc::UnboundedSender<StateChange>,
}

pub fn capture_sink(name: &str) -> (Arc<CaptureSink>, mpsc::UnboundedReceiver<StateChange>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(CaptureSink {
            name: name.to_string(),
            tx,
        }),
        rx,
    )
}

#[async_trait]
impl EventSink for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &StateChange) -> Result<(), IngestError> {
        self.tx
            .send(event.clone())
            .map_err(|_| IngestError::SinkDelivery("capture channel closed".to_string()))
    }
}

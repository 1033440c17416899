use crate::core::errors::IngestError;
use crate::core::kernel::WsCodec;
use crate::hub::types::{ClientFrame, ServerFrame};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Codec for the hub's JSON framing.
///
/// A single WebSocket message normally carries one frame; a hub that
/// accepted the `coalesce_messages` feature may instead send a top-level
/// JSON array of frames.
pub struct HubCodec;

impl WsCodec for HubCodec {
    type Inbound = ServerFrame;
    type Outbound = ClientFrame;

    fn encode(&self, frame: &ClientFrame) -> Result<Message, IngestError> {
        let value = match frame {
            ClientFrame::Auth { access_token } => json!({
                "type": "auth",
                "access_token": access_token,
            }),
            ClientFrame::SupportedFeatures { id, features } => json!({
                "type": "supported_features",
                "id": id,
                "features": {"coalesce_messages": features.coalesce_messages},
            }),
            ClientFrame::SubscribeEvents { id, event_type } => {
                let mut value = json!({"id": id, "type": "subscribe_events"});
                if let Some(filter) = event_type {
                    value["event_type"] = Value::String(filter.clone());
                }
                value
            }
            ClientFrame::UnsubscribeEvents { id, subscription } => json!({
                "id": id,
                "type": "unsubscribe_events",
                "subscription": subscription,
            }),
            ClientFrame::Ping { id } => json!({"id": id, "type": "ping"}),
            ClientFrame::Pong { id: Some(id) } => json!({"id": id, "type": "pong"}),
            ClientFrame::Pong { id: None } => json!({"type": "pong"}),
            ClientFrame::Command {
                id,
                command_type,
                payload,
            } => {
                let mut body = payload.clone();
                body.insert("id".to_string(), json!(id));
                body.insert("type".to_string(), Value::String(command_type.clone()));
                Value::Object(body)
            }
        };
        Ok(Message::Text(value.to_string()))
    }

    fn decode(&self, message: Message) -> Result<Vec<ServerFrame>, IngestError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                IngestError::ProtocolViolation(format!("Invalid UTF-8 in binary message: {}", e))
            })?,
            _ => return Ok(Vec::new()), // Ignore other message types
        };

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| IngestError::ProtocolViolation(format!("Undecodable frame: {}", e)))?;

        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value(item).map_err(|e| {
                        IngestError::ProtocolViolation(format!("Bad frame in coalesced batch: {}", e))
                    })
                })
                .collect(),
            other => {
                let frame = serde_json::from_value(other).map_err(|e| {
                    IngestError::ProtocolViolation(format!("Unexpected frame shape: {}", e))
                })?;
                Ok(vec![frame])
            }
        }
    }
}

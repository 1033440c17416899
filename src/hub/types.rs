use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Frames received from the hub, tagged by the wire-level `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "result")]
    CommandResult {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CommandError>,
    },
    Event {
        id: u64,
        event: WireEvent,
    },
    Pong {
        id: u64,
    },
    Ping {
        #[serde(default)]
        id: Option<u64>,
    },
    /// Forward compatibility: unrecognized frame types are logged and
    /// ignored rather than treated as a protocol violation.
    #[serde(other)]
    Unknown,
}

/// Error payload attached to a failed command result.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandError {
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.to_string(),
            (None, None) => "unspecified command error".to_string(),
        }
    }
}

/// Raw event envelope as delivered by the hub.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: WireEventData,
    #[serde(default)]
    pub time_fired: Option<DateTime<Utc>>,
}

/// Loosely-typed `state_changed` payload; every field is optional on the
/// wire and validated by the normalizer, not here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireEventData {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub old_state: Option<WireEntityState>,
    #[serde(default)]
    pub new_state: Option<WireEntityState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEntityState {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Frames sent to the hub. Encoding lives in [`crate::hub::codec::HubCodec`].
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Auth {
        access_token: String,
    },
    SupportedFeatures {
        id: u64,
        features: FeatureFlags,
    },
    SubscribeEvents {
        id: u64,
        event_type: Option<String>,
    },
    UnsubscribeEvents {
        id: u64,
        subscription: u64,
    },
    Ping {
        id: u64,
    },
    Pong {
        id: Option<u64>,
    },
    /// Correlated command with an arbitrary wire type and payload fields.
    Command {
        id: u64,
        command_type: String,
        payload: Map<String, Value>,
    },
}

impl ClientFrame {
    /// Correlation id carried by the frame, if it expects a response.
    #[must_use]
    pub fn command_id(&self) -> Option<u64> {
        match self {
            Self::SupportedFeatures { id, .. }
            | Self::SubscribeEvents { id, .. }
            | Self::UnsubscribeEvents { id, .. }
            | Self::Ping { id }
            | Self::Command { id, .. } => Some(*id),
            Self::Auth { .. } | Self::Pong { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    pub coalesce_messages: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_auth_required() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"auth_required","ha_version":"2024.6.0"}"#).unwrap();
        assert!(matches!(
            frame,
            ServerFrame::AuthRequired { ha_version: Some(v) } if v == "2024.6.0"
        ));
    }

    #[test]
    fn decodes_command_result() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"id":1,"type":"result","success":true,"result":null}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::CommandResult { id, success, result, error } => {
                assert_eq!(id, 1);
                assert!(success);
                assert!(result.is_none());
                assert!(error.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_failed_result_with_error() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"id":3,"type":"result","success":false,"error":{"code":"unknown_command","message":"nope"}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::CommandResult { success, error: Some(err), .. } => {
                assert!(!success);
                assert_eq!(err.describe(), "\"unknown_command\": nope");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_state_changed_event() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"id":2,"type":"event","event":{"event_type":"state_changed","data":{"entity_id":"light.kitchen","old_state":null,"new_state":{"entity_id":"light.kitchen","state":"on","attributes":{"brightness":254}}},"time_fired":"2024-06-01T12:00:00+00:00"}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::Event { id, event } => {
                assert_eq!(id, 2);
                assert_eq!(event.event_type, "state_changed");
                assert_eq!(event.data.entity_id.as_deref(), Some("light.kitchen"));
                assert!(event.data.old_state.is_none());
                let new_state = event.data.new_state.unwrap();
                assert_eq!(new_state.state.as_deref(), Some("on"));
                assert_eq!(new_state.attributes["brightness"], 254);
                assert!(event.time_fired.is_some());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"zone_updated","zone":"home"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Unknown));
    }

    #[test]
    fn command_id_extraction() {
        assert_eq!(ClientFrame::Ping { id: 9 }.command_id(), Some(9));
        assert_eq!(
            ClientFrame::Auth {
                access_token: String::new()
            }
            .command_id(),
            None
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Snapshot of a single entity's state as reported by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Primary state value (e.g. "on", "21.5").
    pub value: String,
    /// Free-form attribute mapping attached to the state.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityState {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            attributes: Map::new(),
            last_changed: None,
            last_updated: None,
        }
    }
}

/// Canonical normalized event record.
///
/// Transient by design: produced by the normalizer, consumed by the
/// dispatcher's sinks, never persisted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub event_type: String,
    pub entity_id: String,
    pub old_state: Option<EntityState>,
    pub new_state: EntityState,
    /// Hub-side event timestamp, when supplied.
    pub time_fired: Option<DateTime<Utc>>,
    /// Local receive timestamp.
    pub received_at: DateTime<Utc>,
    /// Id of the connection the event arrived on.
    pub connection_id: String,
}

/// Session lifecycle states.
///
/// Transitions only move along the paths encoded in
/// [`SessionState::can_transition_to`]; `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    AuthPending,
    Authenticated,
    Subscribing,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            // Any non-terminal state may be torn down.
            Self::Connecting | Self::AuthPending | Self::Authenticated | Self::Subscribing
                if matches!(next, Self::Closing | Self::Closed | Self::Failed) =>
            {
                true
            }
            Self::Connecting => matches!(next, Self::AuthPending),
            Self::AuthPending => matches!(next, Self::Authenticated),
            Self::Authenticated => matches!(next, Self::Subscribing),
            Self::Subscribing => matches!(next, Self::Active),
            Self::Active => matches!(next, Self::Closing | Self::Closed | Self::Failed),
            Self::Closing => matches!(next, Self::Closed | Self::Failed),
            Self::Closed | Self::Failed => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Authenticated => "authenticated",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Why a session terminated; drives the supervisor's retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Credential rejected by the hub. Never retried.
    AuthFailed(String),
    /// Socket error or unexpected close. Retryable.
    Transport(String),
    /// Frame shape indicating desynchronization. Retryable after reconnect.
    Protocol(String),
    /// Liveness probe went unanswered past the grace window.
    HeartbeatTimeout,
    /// Administrative disable requested graceful closure.
    Disabled,
    /// Server closed the connection in an orderly fashion.
    ServerClosed,
}

impl CloseReason {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::HeartbeatTimeout | Self::ServerClosed
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Disabled => write!(f, "disabled"),
            Self::ServerClosed => write!(f, "server closed"),
        }
    }
}

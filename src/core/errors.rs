use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Authentication rejected by hub: {0}")]
    AuthenticationFailure(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Command {id} timed out after {deadline:?}")]
    CommandTimeout { id: u64, deadline: Duration },

    #[error("Command {id} rejected by hub: {reason}")]
    CommandRejected { id: u64, reason: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Sink delivery failed: {0}")]
    SinkDelivery(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// Per-connection record supplied by the connection registry.
///
/// The access token is an opaque credential reference; it is held in a
/// [`Secret`] and never appears in serialized or logged output.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub id: String,
    pub ws_url: String,
    pub access_token: Secret<String>,
    /// Optional server-side event-type filter for the subscription.
    pub event_filter: Option<String>,
    pub enabled: bool,
}

// Custom Serialize implementation - never expose the token in serialization
impl Serialize for ConnectionConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ConnectionConfig", 5)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.serialize_field("access_token", "[REDACTED]")?;
        state.serialize_field("event_filter", &self.event_filter)?;
        state.serialize_field("enabled", &self.enabled)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ConnectionConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ConnectionConfigHelper {
            id: String,
            ws_url: String,
            access_token: String,
            #[serde(default)]
            event_filter: Option<String>,
            #[serde(default = "default_enabled")]
            enabled: bool,
        }

        let helper = ConnectionConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            id: helper.id,
            ws_url: helper.ws_url,
            access_token: Secret::new(helper.access_token),
            event_filter: helper.event_filter,
            enabled: helper.enabled,
        })
    }
}

fn default_enabled() -> bool {
    true
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, ws_url: impl Into<String>, access_token: String) -> Self {
        Self {
            id: id.into(),
            ws_url: ws_url.into(),
            access_token: Secret::new(access_token),
            event_filter: None,
            enabled: true,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_WS_URL` (e.g., `HUB_WS_URL`)
    /// - `{PREFIX}_TOKEN` (e.g., `HUB_TOKEN`)
    /// - `{PREFIX}_EVENT_FILTER` (optional)
    /// - `{PREFIX}_ENABLED` (optional, defaults to true)
    pub fn from_env(connection_id: &str, prefix: &str) -> Result<Self, ConfigError> {
        let url_var = format!("{}_WS_URL", prefix.to_uppercase());
        let token_var = format!("{}_TOKEN", prefix.to_uppercase());
        let filter_var = format!("{}_EVENT_FILTER", prefix.to_uppercase());
        let enabled_var = format!("{}_ENABLED", prefix.to_uppercase());

        let ws_url =
            env::var(&url_var).map_err(|_| ConfigError::MissingEnvironmentVariable(url_var))?;
        let access_token =
            env::var(&token_var).map_err(|_| ConfigError::MissingEnvironmentVariable(token_var))?;

        let event_filter = env::var(&filter_var).ok();
        let enabled = env::var(&enabled_var)
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        Ok(Self {
            id: connection_id.to_string(),
            ws_url,
            access_token: Secret::new(access_token),
            event_filter,
            enabled,
        })
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// Loads the .env file first (if present), then reads the standard
    /// environment variable names. A missing .env file is not an error.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(connection_id: &str, prefix: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(".env") {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file: {}",
                    e
                )));
            }
        }

        Self::from_env(connection_id, prefix)
    }

    #[must_use]
    pub fn event_filter(mut self, filter: impl Into<String>) -> Self {
        self.event_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Get the access token (use carefully - exposes the secret)
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
    }
}

/// Tuning knobs for a single session's protocol behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Socket establishment timeout.
    pub connect_timeout: Duration,
    /// How long the handshake may wait for each server verdict.
    pub auth_timeout: Duration,
    /// Deadline after which an unresolved command is failed.
    pub command_deadline: Duration,
    /// Liveness probe interval once the session is active.
    pub heartbeat_interval: Duration,
    /// Grace window for a probe reply before the session is declared dead.
    pub heartbeat_grace: Duration,
    /// Negotiate coalesced message batching with the hub.
    pub negotiate_coalescing: bool,
    /// Bound on graceful-closure work (unsubscribe, socket close).
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(30);
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            command_deadline: Duration::from_secs(10),
            heartbeat_interval,
            // 1.5x the probe interval: a stalled reply counts as a dead connection
            heartbeat_grace: heartbeat_interval * 3 / 2,
            negotiate_coalescing: true,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Exponential backoff policy for reconnection scheduling.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized to avoid thundering herds (0.0-1.0).
    pub jitter_fraction: f64,
    /// Continuous Active time after which the attempt counter resets.
    pub stability_window: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
            stability_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

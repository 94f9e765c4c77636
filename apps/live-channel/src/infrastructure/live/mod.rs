//! Live Channel
//!
//! WebSocket adapter driving the [`ConnectionMachine`](crate::domain::connection::ConnectionMachine):
//! liveness probe, transport open, frame I/O, reconnect timer and teardown.

mod manager;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::application::ports::ProbeError;
use crate::domain::connection::ReconnectConfig;
use crate::infrastructure::config::ChannelConfig;

pub use manager::ConnectionManager;

/// Live channel configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint.
    pub url: Url,
    /// Backoff schedule and attempt ceiling.
    pub reconnect: ReconnectConfig,
}

impl LiveConfig {
    /// Configuration with the default reconnect schedule.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Use a custom reconnect schedule.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl From<&ChannelConfig> for LiveConfig {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            url: config.endpoints.ws_url.clone(),
            reconnect: config.reconnect.to_policy(),
        }
    }
}

/// Outbound payload.
///
/// Strings go out verbatim; JSON values are serialized first.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Sent as-is.
    Text(String),
    /// Serialized to a JSON text frame.
    Json(Value),
}

impl Outbound {
    /// Render the frame body.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Live channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No open connection to send on.
    #[error("live channel is not connected")]
    NotConnected,

    /// Outbound value could not be serialized.
    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Transport could not be opened.
    #[error("connection failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Open transport failed.
    #[error("connection lost: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// Liveness probe could not be set up.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_sent_verbatim() {
        assert_eq!(Outbound::from("ping").into_text(), "ping");
        assert_eq!(Outbound::from(r#"{"a":1}"#.to_string()).into_text(), r#"{"a":1}"#);
    }

    #[test]
    fn values_are_serialized() {
        let text = Outbound::from(json!({"type": "subscribe", "topic": "devices"})).into_text();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["topic"], "devices");
    }

    #[test]
    fn config_from_channel_settings() {
        let config = LiveConfig::from(&ChannelConfig::default());
        assert_eq!(config.url.as_str(), "ws://localhost:8000/ws");
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn error_messages() {
        assert_eq!(ChannelError::NotConnected.to_string(), "live channel is not connected");
        assert_eq!(
            ChannelError::Transport {
                message: "reset by peer".to_string()
            }
            .to_string(),
            "connection lost: reset by peer"
        );
    }
}

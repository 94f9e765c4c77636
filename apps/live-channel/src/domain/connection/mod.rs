//! Live Connection Types
//!
//! Domain types for the console's live update channel: the connection
//! lifecycle state, inbound message representation and the snapshot handed
//! to subscribers on every transition.

pub mod machine;
pub mod reconnect;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use machine::{ConnectionMachine, Directive};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy, backoff_delay};

// =============================================================================
// Close Codes
// =============================================================================

/// Close code for a clean, deliberate shutdown handshake.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Check whether a close code indicates an abnormal termination.
///
/// A missing code means the transport went away without a close handshake.
#[must_use]
pub const fn is_abnormal_close(code: Option<u16>) -> bool {
    !matches!(code, Some(NORMAL_CLOSURE))
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Probe or transport open in progress.
    Connecting,
    /// Transport open; frames flow in both directions.
    Connected,
    /// Local side initiated a close.
    Closing,
    /// No transport.
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Disconnected => "disconnected",
        }
    }

    /// Check if a connection is open or being opened.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Inbound Message
// =============================================================================

/// A message received from the server.
///
/// Frames that parse as JSON are kept structured; anything else is passed
/// through untouched as raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Syntactically valid JSON payload.
    Json(Value),
    /// Payload that failed to parse as JSON.
    Raw(String),
}

impl InboundMessage {
    /// Parse a text frame, falling back to the raw string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).map_or_else(|_| Self::Raw(raw.to_string()), Self::Json)
    }

    /// The `type` discriminator of a JSON object payload.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.field_str("type")
    }

    /// The optional human-readable `message` field.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.field_str("message")
    }

    /// The structured payload, if any.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// The raw payload, if parsing failed.
    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Raw(raw) => Some(raw),
        }
    }

    /// Metric label for the payload format.
    #[must_use]
    pub const fn format(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Raw(_) => "raw",
        }
    }

    fn field_str(&self, key: &str) -> Option<&str> {
        self.as_json()?.get(key)?.as_str()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of a connection, delivered to subscribers.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Most recently received message (single slot).
    pub last_message: Option<Arc<InboundMessage>>,
    /// When `last_message` arrived.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Last recorded error description.
    pub error: Option<String>,
    /// Reconnection attempts since the last successful open.
    pub attempts: u32,
}

impl ConnectionSnapshot {
    /// Check if the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Check if a connection attempt is in progress.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_objects() {
        let msg = InboundMessage::parse(r#"{"type":"device_update","message":"node-3 online"}"#);
        assert_eq!(msg.kind(), Some("device_update"));
        assert_eq!(msg.text(), Some("node-3 online"));
        assert_eq!(msg.format(), "json");
        assert!(msg.as_raw().is_none());
    }

    #[test]
    fn keeps_non_json_as_raw() {
        let msg = InboundMessage::parse("pong");
        assert_eq!(msg, InboundMessage::Raw("pong".to_string()));
        assert_eq!(msg.kind(), None);
        assert_eq!(msg.as_raw(), Some("pong"));
    }

    #[test]
    fn scalar_json_has_no_kind() {
        let msg = InboundMessage::parse("42");
        assert!(msg.as_json().is_some());
        assert_eq!(msg.kind(), None);
    }

    #[test]
    fn non_string_type_is_ignored() {
        let msg = InboundMessage::parse(r#"{"type":7}"#);
        assert_eq!(msg.kind(), None);
    }

    #[test]
    fn close_code_classification() {
        assert!(!is_abnormal_close(Some(NORMAL_CLOSURE)));
        assert!(is_abnormal_close(Some(ABNORMAL_CLOSURE)));
        assert!(is_abnormal_close(Some(1011)));
        assert!(is_abnormal_close(None));
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Closing.as_str(), "closing");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Closing.is_active());
    }

    #[test]
    fn snapshot_flags() {
        let snapshot = ConnectionSnapshot {
            state: ConnectionState::Connecting,
            ..Default::default()
        };
        assert!(snapshot.is_connecting());
        assert!(!snapshot.is_connected());
    }
}

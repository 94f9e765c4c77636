//! Connection State Machine
//!
//! Pure transition logic for the live connection. The async driver feeds
//! transport events in and executes the returned [`Directive`]; nothing in
//! here touches timers or sockets.
//!
//! ```text
//!                 begin_connect
//!  Disconnected ────────────────► Connecting ──on_open──► Connected
//!       ▲                             │                      │
//!       │      on_probe_failed /      │                      │ begin_close
//!       │      on_error / on_close    │                      ▼
//!       └─────────────────────────────┴──────────────────  Closing
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::{ConnectionSnapshot, ConnectionState, InboundMessage, is_abnormal_close};

/// Follow-up action the driver must take after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to schedule.
    None,
    /// Arm the reconnect timer.
    Reconnect {
        /// Attempt number this timer belongs to (1-based).
        attempt: u32,
        /// Delay before reconnecting.
        delay: Duration,
    },
    /// The attempt ceiling was hit; stop retrying automatically.
    GiveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Connection lifecycle state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    error: Option<String>,
    policy: ReconnectPolicy,
    last_message: Option<Arc<InboundMessage>>,
    last_message_at: Option<DateTime<Utc>>,
}

impl ConnectionMachine {
    /// Create a machine in the `Disconnected` state.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error: None,
            policy: ReconnectPolicy::new(config),
            last_message: None,
            last_message_at: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last recorded error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reconnection attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// Most recently received message.
    #[must_use]
    pub fn last_message(&self) -> Option<&Arc<InboundMessage>> {
        self.last_message.as_ref()
    }

    /// Build a subscriber snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            last_message: self.last_message.clone(),
            last_message_at: self.last_message_at,
            error: self.error.clone(),
            attempts: self.policy.attempt_count(),
        }
    }

    /// Start a connection attempt.
    ///
    /// Returns `false` without changing anything when a connection is
    /// already open or opening.
    pub fn begin_connect(&mut self) -> bool {
        if self.state.is_active() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The liveness probe failed; the transport was never opened.
    pub fn on_probe_failed(&mut self, reason: &str) -> Directive {
        self.state = ConnectionState::Disconnected;
        self.error = Some(format!("backend unreachable: {reason}"));
        self.schedule_retry()
    }

    /// The transport opened.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.error = None;
        self.policy.reset();
    }

    /// A text frame arrived. Returns the stored message.
    pub fn on_message(&mut self, raw: &str, received_at: DateTime<Utc>) -> Arc<InboundMessage> {
        let message = Arc::new(InboundMessage::parse(raw));
        self.last_message = Some(Arc::clone(&message));
        self.last_message_at = Some(received_at);
        message
    }

    /// The transport reported an error. The close that follows decides
    /// whether to reconnect.
    pub fn on_error(&mut self, description: &str) {
        self.state = ConnectionState::Disconnected;
        self.error = Some(description.to_string());
    }

    /// The transport closed with an optional close code.
    pub fn on_close(&mut self, code: Option<u16>) -> Directive {
        let closed_locally = self.state == ConnectionState::Closing;
        self.state = ConnectionState::Disconnected;

        if closed_locally || !is_abnormal_close(code) {
            return Directive::None;
        }
        self.schedule_retry()
    }

    /// Mark a locally initiated close. Returns `false` if nothing is open.
    pub fn begin_close(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = ConnectionState::Closing;
        true
    }

    /// Manual reconnect: drop the current connection and start counting
    /// attempts from zero.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.error = None;
        self.policy.reset();
    }

    /// Final transition on disposal.
    pub fn shut_down(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    fn schedule_retry(&mut self) -> Directive {
        if let Some(delay) = self.policy.next_delay() {
            return Directive::Reconnect {
                attempt: self.policy.attempt_count(),
                delay,
            };
        }

        let attempts = self.policy.attempt_count();
        self.error = Some(ReconnectError::MaxAttemptsExceeded(self.policy.max_attempts()).to_string());
        Directive::GiveUp { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(ReconnectConfig::default())
    }

    fn reconnect_delay(directive: Directive) -> Duration {
        match directive {
            Directive::Reconnect { delay, .. } => delay,
            other => panic!("expected reconnect, got {other:?}"),
        }
    }

    #[test]
    fn begin_connect_is_single_flight() {
        let mut m = machine();
        assert!(m.begin_connect());
        assert!(!m.begin_connect());
        assert_eq!(m.state(), ConnectionState::Connecting);

        m.on_open();
        assert!(!m.begin_connect());
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn open_clears_error_and_attempts() {
        let mut m = machine();
        m.begin_connect();
        m.on_error("connection refused");
        let _ = m.on_close(None);
        assert_eq!(m.attempts(), 1);
        assert!(m.error().is_some());

        m.begin_connect();
        m.on_open();
        assert_eq!(m.attempts(), 0);
        assert!(m.error().is_none());
    }

    #[test]
    fn normal_close_does_not_reconnect() {
        let mut m = machine();
        m.begin_connect();
        m.on_open();
        assert_eq!(m.on_close(Some(NORMAL_CLOSURE)), Directive::None);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn local_close_does_not_reconnect() {
        let mut m = machine();
        m.begin_connect();
        m.on_open();
        assert!(m.begin_close());
        assert_eq!(m.state(), ConnectionState::Closing);
        assert_eq!(m.on_close(None), Directive::None);
    }

    #[test]
    fn error_alone_does_not_schedule() {
        let mut m = machine();
        m.begin_connect();
        m.on_open();
        m.on_error("broken pipe");
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.error(), Some("broken pipe"));
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn abnormal_closes_back_off_then_give_up() {
        let mut m = machine();
        let mut delays = Vec::new();

        for _ in 0..5 {
            m.begin_connect();
            delays.push(reconnect_delay(m.on_close(Some(ABNORMAL_CLOSURE))));
        }
        assert_eq!(
            delays,
            [1_000, 2_000, 4_000, 8_000, 16_000].map(Duration::from_millis)
        );

        m.begin_connect();
        assert_eq!(m.on_close(Some(ABNORMAL_CLOSURE)), Directive::GiveUp { attempts: 5 });
        assert_eq!(m.error(), Some("maximum reconnection attempts (5) exceeded"));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_attempt_numbers_are_one_based() {
        let mut m = machine();
        m.begin_connect();
        assert_eq!(
            m.on_close(None),
            Directive::Reconnect {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn success_resets_backoff() {
        let mut m = machine();
        for _ in 0..3 {
            m.begin_connect();
            let _ = m.on_close(None);
        }
        assert_eq!(m.attempts(), 3);

        m.begin_connect();
        m.on_open();
        assert_eq!(reconnect_delay(m.on_close(None)), Duration::from_secs(1));
    }

    #[test]
    fn probe_failure_counts_as_transient() {
        let mut m = machine();
        m.begin_connect();
        let directive = m.on_probe_failed("HTTP 503");
        assert_eq!(reconnect_delay(directive), Duration::from_secs(1));
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.error(), Some("backend unreachable: HTTP 503"));
    }

    #[test]
    fn reset_allows_retrying_after_give_up() {
        let mut m = machine();
        for _ in 0..6 {
            m.begin_connect();
            let _ = m.on_close(None);
        }
        assert!(m.error().is_some());

        m.reset();
        assert_eq!(m.attempts(), 0);
        assert!(m.error().is_none());
        assert!(m.begin_connect());
    }

    #[test]
    fn message_slot_is_superseded() {
        let mut m = machine();
        let now = Utc::now();
        m.on_message(r#"{"type":"a"}"#, now);
        m.on_message("not json", now);

        let last = m.last_message().unwrap();
        assert_eq!(last.as_raw(), Some("not json"));
        assert_eq!(m.snapshot().last_message_at, Some(now));
    }
}

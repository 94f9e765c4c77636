//! Prometheus Metrics Module
//!
//! Counters and gauges for the live channel and poll loops.
//!
//! # Metrics Categories
//!
//! - **Messages**: inbound frames by payload format
//! - **Connections**: connected gauge, reconnect and error counters
//! - **Polling**: producer runs by outcome
//!
//! # Integration
//!
//! Recording is always safe: without an installed recorder the `metrics`
//! facade discards every sample. The watcher binary installs the Prometheus
//! exporter with its own HTTP listener when a metrics port is configured.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use parking_lot::Mutex;

// =============================================================================
// Exporter Installation
// =============================================================================

/// Listener address of the installed exporter. Locked for the whole install.
static INSTALLED: Mutex<Option<SocketAddr>> = Mutex::new(None);

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Subsequent calls are no-ops returning the address of the first install.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed by someone else.
pub fn init_metrics(addr: SocketAddr) -> Result<SocketAddr, BuildError> {
    let mut installed = INSTALLED.lock();
    if let Some(existing) = *installed {
        return Ok(existing);
    }

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    *installed = Some(addr);
    Ok(addr)
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "live_channel_messages_received_total",
        "Total frames received on the live channel"
    );
    describe_gauge!(
        "live_channel_connected",
        "1 while the live channel is open, 0 otherwise"
    );
    describe_counter!(
        "live_channel_reconnects_total",
        "Total scheduled reconnection attempts"
    );
    describe_counter!(
        "live_channel_connection_errors_total",
        "Total live channel failures by kind"
    );
    describe_counter!(
        "live_channel_poll_runs_total",
        "Total poll producer runs by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Liveness probe failed.
    Probe,
    /// Transport could not be opened.
    Connect,
    /// Read or write failed on an open transport.
    Transport,
    /// Reconnect ceiling reached.
    Exhausted,
}

impl ErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Connect => "connect",
            Self::Transport => "transport",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Record an inbound frame.
pub fn record_message_received(format: &'static str) {
    counter!("live_channel_messages_received_total", "format" => format).increment(1);
}

/// Update the connected gauge.
pub fn set_connected(connected: bool) {
    gauge!("live_channel_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("live_channel_reconnects_total").increment(1);
}

/// Record a connection failure.
pub fn record_connection_error(kind: ErrorKind) {
    counter!("live_channel_connection_errors_total", "kind" => kind.as_str()).increment(1);
}

/// Record a completed poll run.
pub fn record_poll_run(success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!("live_channel_poll_runs_total", "outcome" => outcome).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_as_str() {
        assert_eq!(ErrorKind::Probe.as_str(), "probe");
        assert_eq!(ErrorKind::Connect.as_str(), "connect");
        assert_eq!(ErrorKind::Transport.as_str(), "transport");
        assert_eq!(ErrorKind::Exhausted.as_str(), "exhausted");
    }

    #[test]
    fn concurrent_init_installs_once() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(move || init_metrics(addr)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result.unwrap(), addr);
        }
        assert_eq!(init_metrics(SocketAddr::from(([127, 0, 0, 1], 1))).unwrap(), addr);
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_message_received("json");
        record_reconnect();
        record_connection_error(ErrorKind::Probe);
        record_poll_run(false);
        set_connected(true);
    }
}

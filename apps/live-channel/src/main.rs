//! Live Channel Watcher
//!
//! Connects to the console backend's live endpoint, polls one API path,
//! refreshes the poll on every push message and logs what it sees.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin live-channel
//! ```
//!
//! # Environment Variables
//!
//! - `CONSOLE_API_BASE`: REST API base (default: <http://localhost:8000/api>)
//! - `CONSOLE_HEALTH_URL`: liveness endpoint (default: API origin + `/healthz`)
//! - `CONSOLE_WS_URL`: live endpoint (default: API origin + `/ws`)
//! - `CONSOLE_PROBE_ENABLED`: probe before connecting (default: true)
//! - `CONSOLE_RECONNECT_DELAY_INITIAL_MS`, `CONSOLE_RECONNECT_DELAY_MAX_MS`,
//!   `CONSOLE_RECONNECT_DELAY_MULTIPLIER`, `CONSOLE_MAX_RECONNECT_ATTEMPTS`
//! - `CONSOLE_POLL_INTERVAL_MS`: poll interval (default: 10000)
//! - `CONSOLE_POLL_PATH`: polled API path (default: /devices)
//! - `CONSOLE_HTTP_TIMEOUT_SECS`: request timeout (default: 15)
//! - `CONSOLE_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::net::SocketAddr;

use anyhow::Context;
use live_channel::infrastructure::telemetry;
use live_channel::{
    ApiClient, ChannelConfig, ConnectionManager, ConnectionSnapshot, ConnectionState, PollLoop,
    PollState, RefreshOnPush, init_metrics,
};
use serde_json::Value;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv_from_ancestors();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting live channel watcher");

    let config = ChannelConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        init_metrics(addr).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    let shutdown = CancellationToken::new();

    let api = ApiClient::from_config(&config)?;
    if !api.is_server_running().await {
        tracing::warn!(
            health_url = %config.endpoints.health_url,
            "Backend not reachable yet, will keep retrying"
        );
    }

    let manager = ConnectionManager::from_config(&config, &shutdown)?;
    let poll = PollLoop::start(
        api.producer::<Value>(config.poll.path.clone()),
        config.poll.interval,
    );

    let refresher =
        RefreshOnPush::any().spawn(manager.subscribe(), poll.refetch_handle(), shutdown.clone());
    tokio::spawn(log_connection(manager.subscribe(), shutdown.clone()));
    tokio::spawn(log_poll(poll.subscribe(), shutdown.clone()));

    manager.connect();
    tracing::info!("Live channel watcher ready");

    await_shutdown(&shutdown).await;

    manager.dispose();
    poll.stop();
    if let Err(e) = refresher.await {
        tracing::warn!(error = %e, "Refresh task ended abnormally");
    }

    tracing::info!("Live channel watcher stopped");
    Ok(())
}

/// Log connection transitions and inbound messages.
async fn log_connection(
    mut updates: watch::Receiver<ConnectionSnapshot>,
    shutdown: CancellationToken,
) {
    let mut last_state = ConnectionState::Disconnected;
    let mut last_seen = None;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        if snapshot.state != last_state {
            tracing::info!(
                from = %last_state,
                to = %snapshot.state,
                attempts = snapshot.attempts,
                error = snapshot.error.as_deref().unwrap_or_default(),
                "Connection state changed"
            );
            last_state = snapshot.state;
        }

        if snapshot.last_message_at.is_some() && snapshot.last_message_at != last_seen {
            last_seen = snapshot.last_message_at;
            if let Some(message) = &snapshot.last_message {
                tracing::info!(
                    kind = message.kind().unwrap_or("-"),
                    text = message.text().unwrap_or_default(),
                    format = message.format(),
                    "Push message received"
                );
            }
        }
    }
}

/// Log poll results.
async fn log_poll(mut updates: watch::Receiver<PollState<Value>>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let state = updates.borrow_and_update().clone();
        if state.is_loading {
            continue;
        }
        match (&state.error, &state.data) {
            (Some(error), _) => tracing::warn!(%error, stale = state.data.is_some(), "Poll failed"),
            (None, Some(Value::Array(items))) => tracing::info!(count = items.len(), "Poll succeeded"),
            (None, Some(_)) => tracing::info!("Poll succeeded"),
            (None, None) => {}
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ChannelConfig) {
    tracing::info!(
        api_base = %config.endpoints.api_base,
        ws_url = %config.endpoints.ws_url,
        probe_enabled = config.probe_enabled,
        poll_path = %config.poll.path,
        poll_interval_ms = config.poll.interval.as_millis(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        delay_initial_ms = config.reconnect.delay_initial.as_millis(),
        delay_max_ms = config.reconnect.delay_max.as_millis(),
        max_attempts = config.reconnect.max_attempts,
        "Reconnect policy"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then cancel `shutdown`.
async fn await_shutdown(shutdown: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    shutdown.cancel();
}

//! Live Connection Manager

use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{ChannelError, LiveConfig, Outbound};
use crate::application::ports::LivenessProbe;
use crate::domain::connection::{ConnectionMachine, ConnectionSnapshot, ConnectionState, Directive};
use crate::infrastructure::config::ChannelConfig;
use crate::infrastructure::http::HttpLivenessProbe;
use crate::infrastructure::metrics::{self, ErrorKind};

/// Owns the single live connection for one logical session.
///
/// Every transition is applied under one lock and published to subscribers
/// before the lock is released, so subscribers see transitions in order.
/// Each transport session carries its own cancellation token; events from a
/// session that was replaced or disposed are ignored.
///
/// Dropping the manager disposes it.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: LiveConfig,
    probe: Option<Arc<dyn LivenessProbe>>,
    shared: Mutex<Shared>,
    updates: watch::Sender<ConnectionSnapshot>,
    shutdown: CancellationToken,
}

struct Shared {
    machine: ConnectionMachine,
    /// Token of the current transport session.
    session: Option<CancellationToken>,
    /// Frame queue of the open transport.
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// The one pending reconnect timer.
    timer: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`connect`](Self::connect).
    ///
    /// Cancelling `shutdown` has the same effect as [`dispose`](Self::dispose)
    /// on timers and transports.
    #[must_use]
    pub fn new(
        config: LiveConfig,
        probe: Option<Arc<dyn LivenessProbe>>,
        shutdown: &CancellationToken,
    ) -> Self {
        let machine = ConnectionMachine::new(config.reconnect.clone());
        let (updates, _) = watch::channel(machine.snapshot());

        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                shared: Mutex::new(Shared {
                    machine,
                    session: None,
                    outbound: None,
                    timer: None,
                }),
                updates,
                shutdown: shutdown.child_token(),
            }),
        }
    }

    /// Create a manager from the channel configuration, probing the health
    /// endpoint before each connect when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe's HTTP client cannot be built.
    pub fn from_config(
        config: &ChannelConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self, ChannelError> {
        let probe: Option<Arc<dyn LivenessProbe>> = if config.probe_enabled {
            Some(Arc::new(HttpLivenessProbe::new(
                config.endpoints.health_url.clone(),
                config.http_timeout,
            )?))
        } else {
            None
        };

        Ok(Self::new(LiveConfig::from(config), probe, shutdown))
    }

    /// Open the connection.
    ///
    /// Returns `false` if a connection is already open or opening, or the
    /// manager has been disposed.
    pub fn connect(&self) -> bool {
        self.inner.connect()
    }

    /// Send a frame on the open connection.
    ///
    /// Nothing is buffered: when the connection is not open the message is
    /// dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] when there is no open transport.
    pub fn send(&self, message: impl Into<Outbound>) -> Result<(), ChannelError> {
        let shared = self.inner.shared.lock();
        let state = shared.machine.state();

        let Some(outbound) = shared
            .outbound
            .as_ref()
            .filter(|_| state == ConnectionState::Connected)
        else {
            tracing::warn!(%state, "Live channel not connected, dropping outbound message");
            return Err(ChannelError::NotConnected);
        };

        let text = Outbound::into_text(message.into());
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Serialize `value` as JSON and send it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the channel is not open.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(value)?;
        self.send(Outbound::Text(text))
    }

    /// Drop the current connection, cancel any pending retry, reset the
    /// attempt counter and connect again.
    ///
    /// Returns `false` if the manager has been disposed.
    pub fn reconnect(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        tracing::info!(url = %self.inner.config.url, "Manual reconnect requested");
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if let Some(session) = shared.session.take() {
            session.cancel();
        }
        shared.outbound = None;
        shared.machine.reset();

        self.inner.connect_locked(&mut shared)
    }

    /// Tear down: cancel the pending retry and close the transport.
    ///
    /// Subscribers receive no further updates.
    pub fn dispose(&self) {
        let mut shared = self.inner.shared.lock();
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!(url = %self.inner.config.url, "Disposing live channel");
        }
        self.inner.shutdown.cancel();

        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if let Some(session) = shared.session.take() {
            session.cancel();
        }
        shared.outbound = None;
        shared.machine.begin_close();
        shared.machine.shut_down();
        metrics::set_connected(false);
    }

    /// Receive a snapshot on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.shared.lock().machine.snapshot()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().machine.state()
    }

    /// Check whether the manager has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Check whether a reconnect timer is pending.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .shared
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) -> bool {
        let mut shared = self.shared.lock();
        self.connect_locked(&mut shared)
    }

    fn connect_locked(self: &Arc<Self>, shared: &mut Shared) -> bool {
        if self.shutdown.is_cancelled() || !shared.machine.begin_connect() {
            return false;
        }

        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        let session = self.shutdown.child_token();
        if let Some(previous) = shared.session.replace(session.clone()) {
            previous.cancel();
        }
        self.publish(shared);

        let span = tracing::info_span!(
            "live_session",
            session_id = %Uuid::new_v4(),
            url = %self.config.url,
        );
        tokio::spawn(Arc::clone(self).run_session(session).instrument(span));
        true
    }

    async fn run_session(self: Arc<Self>, session: CancellationToken) {
        if let Some(probe) = self.probe.clone() {
            let probed = tokio::select! {
                () = session.cancelled() => return,
                result = probe.check() => result,
            };
            if let Err(e) = probed {
                tracing::warn!(error = %e, "Liveness probe failed");
                metrics::record_connection_error(ErrorKind::Probe);
                self.transition(&session, |machine| machine.on_probe_failed(&e.to_string()));
                return;
            }
        }

        tracing::info!("Connecting to live channel");
        let connected = tokio::select! {
            () = session.cancelled() => return,
            result = connect_async(self.config.url.as_str()) => result,
        };

        let stream = match connected {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Live channel connect failed");
                metrics::record_connection_error(ErrorKind::Connect);
                let error = ChannelError::Connect {
                    message: e.to_string(),
                };
                self.transition(&session, |machine| {
                    machine.on_error(&error.to_string());
                    machine.on_close(None)
                });
                return;
            }
        };

        let (mut write, mut read) = stream.split();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();

        let opened = self.update(&session, |shared| {
            shared.machine.on_open();
            shared.outbound = Some(frames_tx);
        });
        if opened.is_none() {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
        tracing::info!("Live channel connected");

        loop {
            tokio::select! {
                () = session.cancelled() => {
                    tracing::info!("Closing live channel");
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closing".into(),
                        })))
                        .await;
                    return;
                }
                Some(frame) = frames_rx.recv() => {
                    if let Err(e) = write.send(frame).await {
                        self.lost(&session, &e.to_string());
                        return;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.update(&session, |shared| {
                            let message = shared.machine.on_message(text.as_str(), Utc::now());
                            metrics::record_message_received(message.format());
                        });
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        tracing::info!(?code, "Live channel closed by server");
                        self.transition(&session, |machine| machine.on_close(code));
                        return;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.lost(&session, &e.to_string());
                        return;
                    }
                    None => {
                        self.transition(&session, |machine| machine.on_close(None));
                        return;
                    }
                }
            }
        }
    }

    /// Transport failed while open: record the error, then treat it as an
    /// abnormal close.
    fn lost(self: &Arc<Self>, session: &CancellationToken, reason: &str) {
        tracing::warn!(error = reason, "Live channel transport error");
        metrics::record_connection_error(ErrorKind::Transport);
        let error = ChannelError::Transport {
            message: reason.to_string(),
        };
        self.transition(session, |machine| {
            machine.on_error(&error.to_string());
            machine.on_close(None)
        });
    }

    /// Apply a terminal transition for `session` and execute its directive.
    fn transition(
        self: &Arc<Self>,
        session: &CancellationToken,
        apply: impl FnOnce(&mut ConnectionMachine) -> Directive,
    ) {
        let mut shared = self.shared.lock();
        if session.is_cancelled() {
            return;
        }
        shared.outbound = None;
        let directive = apply(&mut shared.machine);
        self.execute(&mut shared, directive);
        self.publish(&shared);
    }

    /// Mutate shared state for `session` and publish. `None` if the session
    /// is stale.
    fn update<R>(&self, session: &CancellationToken, apply: impl FnOnce(&mut Shared) -> R) -> Option<R> {
        let mut shared = self.shared.lock();
        if session.is_cancelled() {
            return None;
        }
        let result = apply(&mut shared);
        self.publish(&shared);
        Some(result)
    }

    fn execute(self: &Arc<Self>, shared: &mut Shared, directive: Directive) {
        match directive {
            Directive::None => {}
            Directive::Reconnect { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Scheduling live channel reconnect"
                );
                metrics::record_reconnect();

                let inner = Arc::clone(self);
                let timer = tokio::spawn(async move {
                    tokio::select! {
                        () = inner.shutdown.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            inner.connect();
                        }
                    }
                });
                if let Some(previous) = shared.timer.replace(timer) {
                    previous.abort();
                }
            }
            Directive::GiveUp { attempts } => {
                tracing::error!(attempts, "Live channel reconnection attempts exhausted");
                metrics::record_connection_error(ErrorKind::Exhausted);
            }
        }
    }

    fn publish(&self, shared: &Shared) {
        let snapshot = shared.machine.snapshot();
        metrics::set_connected(snapshot.is_connected());
        self.updates.send_replace(snapshot);
    }
}

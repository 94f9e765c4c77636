//! Poll Loop
//!
//! Runs an async producer on a fixed interval and exposes the latest
//! [`PollState`] with stale-while-revalidate semantics.
//!
//! One long-lived task drives each loop. A cycle runs the producer to
//! completion, settles the state, then waits for whichever comes first:
//! the interval timer, a `refetch()` kick, or `stop()`. Runs never overlap
//! and only one timer is ever pending. A producer call is never aborted;
//! if the loop is stopped while it is in flight its result is discarded.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Refetch;
use crate::domain::poll::PollState;
use crate::infrastructure::metrics;

/// Default delay between runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

struct Inner<T> {
    state: PollState<T>,
    interval: Duration,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    updates: watch::Sender<PollState<T>>,
    /// Cancelled on stop; checked under the lock before every mutation.
    alive: CancellationToken,
    kick: Notify,
    rearm: Notify,
}

impl<T: Clone> Shared<T> {
    fn refetch(&self) -> bool {
        let mut inner = self.inner.lock();
        if self.alive.is_cancelled() {
            return false;
        }
        inner.state.begin_refresh();
        self.updates.send_replace(inner.state.clone());
        self.kick.notify_one();
        true
    }
}

/// Self-rescheduling fetch loop.
///
/// Dropping the loop stops it.
pub struct PollLoop<T> {
    shared: Arc<Shared<T>>,
    task: JoinHandle<()>,
}

impl<T> PollLoop<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start polling. The producer runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut, E>(producer: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + 'static,
    {
        let state = PollState::default();
        let (updates, _) = watch::channel(state.clone());

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { state, interval }),
            updates,
            alive: CancellationToken::new(),
            kick: Notify::new(),
            rearm: Notify::new(),
        });

        let task = tokio::spawn(drive(Arc::clone(&shared), producer));

        Self { shared, task }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> PollState<T> {
        self.shared.inner.lock().state.clone()
    }

    /// Receive every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.shared.updates.subscribe()
    }

    /// Run the producer now instead of waiting for the timer.
    ///
    /// If a run is already in flight, another one starts right after it
    /// settles. Returns `false` once the loop has been stopped.
    pub fn refetch(&self) -> bool {
        self.shared.refetch()
    }

    /// Change the interval. The pending timer is re-armed with the new
    /// interval, measured from the end of the last run.
    pub fn set_interval(&self, interval: Duration) {
        let mut inner = self.shared.inner.lock();
        if self.shared.alive.is_cancelled() {
            return;
        }
        inner.interval = interval;
        self.shared.rearm.notify_one();
    }

    /// Current interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.shared.inner.lock().interval
    }

    /// Handle that can trigger refetches from another task.
    #[must_use]
    pub fn refetch_handle(&self) -> RefetchHandle<T> {
        RefetchHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        let _inner = self.shared.inner.lock();
        self.shared.alive.cancel();
    }

    /// Check whether the loop has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.alive.is_cancelled()
    }

    /// Check whether the driver task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Drop for PollLoop<T> {
    fn drop(&mut self) {
        let _inner = self.shared.inner.lock();
        self.shared.alive.cancel();
    }
}

/// Cloneable trigger for [`PollLoop::refetch`].
pub struct RefetchHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RefetchHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Refetch for RefetchHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refetch(&self) -> bool {
        self.shared.refetch()
    }
}

async fn drive<T, F, Fut, E>(shared: Arc<Shared<T>>, producer: F)
where
    T: Clone,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    loop {
        let started_epoch = shared.inner.lock().state.refresh_epoch;

        let outcome = producer().await.map_err(|e| e.to_string());

        {
            let mut inner = shared.inner.lock();
            if shared.alive.is_cancelled() {
                tracing::debug!("Poll loop stopped, discarding late result");
                return;
            }
            metrics::record_poll_run(outcome.is_ok());
            if let Err(error) = &outcome {
                tracing::debug!(%error, "Poll run failed, keeping previous data");
            }
            inner.state.settle(outcome, started_epoch);
            shared.updates.send_replace(inner.state.clone());
        }

        let settled_at = Instant::now();
        loop {
            let deadline = settled_at + shared.inner.lock().interval;
            tokio::select! {
                () = shared.alive.cancelled() => return,
                () = shared.kick.notified() => break,
                () = shared.rearm.notified() => {}
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Let spawned tasks run without advancing the paused clock.
    async fn settle_tasks() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_producer(
        counter: Arc<AtomicU32>,
    ) -> impl Fn() -> std::future::Ready<Result<u32, String>> + Send + Sync + 'static {
        move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_interval() {
        let runs = Arc::new(AtomicU32::new(0));
        let poll = PollLoop::start(counting_producer(Arc::clone(&runs)), Duration::from_secs(10));

        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let state = poll.state();
        assert_eq!(state.data, Some(1));
        assert!(!state.is_loading);

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(poll.state().data, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn producer_errors_are_rendered() {
        let poll = PollLoop::start(
            || async {
                Err::<u32, _>(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))
            },
            Duration::from_secs(10),
        );
        settle_tasks().await;

        let state = poll.state();
        assert_eq!(state.error.as_deref(), Some("connection refused"));
        assert!(state.data.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn set_interval_rearms_pending_timer() {
        let runs = Arc::new(AtomicU32::new(0));
        let poll = PollLoop::start(counting_producer(Arc::clone(&runs)), Duration::from_secs(10));
        settle_tasks().await;

        poll.set_interval(Duration::from_secs(2));
        assert_eq!(poll.interval(), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_rejects_refetch() {
        let runs = Arc::new(AtomicU32::new(0));
        let poll = PollLoop::start(counting_producer(Arc::clone(&runs)), Duration::from_secs(1));
        settle_tasks().await;

        poll.stop();
        poll.stop();
        assert!(poll.is_stopped());
        assert!(!poll.refetch());

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(poll.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_handle_stops_with_loop() {
        let runs = Arc::new(AtomicU32::new(0));
        let poll = PollLoop::start(counting_producer(Arc::clone(&runs)), Duration::from_secs(60));
        let handle = poll.refetch_handle();
        settle_tasks().await;

        assert!(Refetch::refetch(&handle));
        settle_tasks().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        drop(poll);
        assert!(!Refetch::refetch(&handle));
    }
}

//! Application Services
//!
//! - `RefreshOnPush`: re-runs a poll loop when the live channel delivers a
//!   matching notification

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Refetch;
use crate::domain::connection::{ConnectionSnapshot, InboundMessage};

/// Triggers `refetch()` on a poll loop whenever a new push message arrives.
///
/// With no kinds configured every message triggers a refresh; otherwise only
/// JSON messages whose `type` is in the set do.
#[derive(Debug, Clone, Default)]
pub struct RefreshOnPush {
    kinds: HashSet<String>,
}

impl RefreshOnPush {
    /// Refresh on any message.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Refresh only on messages with one of the given `type` values.
    #[must_use]
    pub fn for_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether a message should trigger a refresh.
    #[must_use]
    pub fn matches(&self, message: &InboundMessage) -> bool {
        if self.kinds.is_empty() {
            return true;
        }
        message.kind().is_some_and(|kind| self.kinds.contains(kind))
    }

    /// Spawn the watcher task.
    ///
    /// The task exits when `cancel` fires, the connection manager goes away,
    /// or the refetch target reports it has been torn down.
    pub fn spawn<R>(
        self,
        mut updates: watch::Receiver<ConnectionSnapshot>,
        target: R,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        R: Refetch + 'static,
    {
        let mut seen = updates.borrow_and_update().last_message.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Live channel closed, stopping refresh-on-push");
                            break;
                        }
                    }
                }

                let latest = updates.borrow_and_update().last_message.clone();
                let Some(message) = latest.as_ref() else {
                    continue;
                };
                if seen.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, message)) {
                    continue;
                }
                seen = latest.clone();

                if self.matches(message) {
                    tracing::debug!(kind = ?message.kind(), "Push message received, refetching");
                    if !target.refetch() {
                        tracing::debug!("Refetch target torn down, stopping refresh-on-push");
                        break;
                    }
                }
            }
        })
    }
}

//! Poll State
//!
//! The value a poll loop exposes to its consumer, plus the settle rules
//! that give it stale-while-revalidate semantics.

/// Result of one producer invocation, with the error already rendered.
pub type PollOutcome<T> = Result<T, String>;

/// Latest state of a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState<T> {
    /// Last successfully fetched value.
    pub data: Option<T>,
    /// Description of the most recent failure, cleared on success.
    pub error: Option<String>,
    /// A run requested by activation or `refetch()` has not settled yet.
    pub is_loading: bool,
    /// Incremented by every `refetch()`.
    pub refresh_epoch: u64,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: true,
            refresh_epoch: 0,
        }
    }
}

impl<T> PollState<T> {
    /// Apply the outcome of a run that started during `started_epoch`.
    ///
    /// Failures keep the previous data. The loading flag is only cleared by
    /// a run belonging to the current epoch, so a run that was already in
    /// flight when `refetch()` was called does not hide the pending refresh.
    pub fn settle(&mut self, outcome: PollOutcome<T>, started_epoch: u64) {
        match outcome {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(error) => {
                self.error = Some(error);
            }
        }

        if started_epoch == self.refresh_epoch {
            self.is_loading = false;
        }
    }

    /// Request an immediate refresh.
    pub const fn begin_refresh(&mut self) {
        self.refresh_epoch += 1;
        self.is_loading = true;
    }

    /// Check whether the last run failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_loading_without_data() {
        let state = PollState::<u32>::default();
        assert!(state.is_loading);
        assert!(state.data.is_none());
        assert!(!state.has_error());
        assert_eq!(state.refresh_epoch, 0);
    }

    #[test]
    fn failure_keeps_previous_data() {
        let mut state = PollState::default();
        state.settle(Ok("devices v1"), 0);
        state.settle(Err("HTTP 502: Bad Gateway".to_string()), 0);

        assert_eq!(state.data, Some("devices v1"));
        assert_eq!(state.error.as_deref(), Some("HTTP 502: Bad Gateway"));
        assert!(!state.is_loading);
    }

    #[test]
    fn success_clears_error() {
        let mut state = PollState::default();
        state.settle(Err("timeout".to_string()), 0);
        state.settle(Ok(3), 0);
        assert_eq!(state.data, Some(3));
        assert!(state.error.is_none());
    }

    #[test]
    fn stale_epoch_keeps_loading() {
        let mut state = PollState::default();
        state.settle(Ok(1), 0);
        state.begin_refresh();
        assert!(state.is_loading);

        state.settle(Ok(2), 0);
        assert_eq!(state.data, Some(2));
        assert!(state.is_loading);

        state.settle(Ok(3), 1);
        assert!(!state.is_loading);
    }
}

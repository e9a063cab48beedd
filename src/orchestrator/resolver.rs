//! Target resolution: debounce of host edits and stale-response detection.

use std::time::Duration;
use tokio::time::Instant;

/// Context a detection request was dispatched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DetectionTicket {
    pub host: String,
    pub cycle: u64,
}

impl DetectionTicket {
    /// A response is only applied if nothing superseded its request.
    pub(crate) fn is_current(&self, host: &str, cycle: u64) -> bool {
        self.cycle == cycle && self.host == host
    }
}

/// Quiescence timer for host edits. Each edit pushes the deadline out by the
/// full window; the controller dispatches detection once it elapses.
#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Resolves when the window elapses; never resolves while nothing is pending.
    /// The caller must `cancel` after it fires.
    pub(crate) async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => futures::future::pending().await,
        }
    }
}

//! Bounded waits with an explicit deadline.
//!
//! Every timed wait in the beacon goes through [`poll_until`] so the
//! timeout arithmetic lives in one place.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// A point in time after which a wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Time left, zero once passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// The underlying instant.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.0
    }
}

/// Call `poll` now and then every `interval` until it yields a value or
/// `deadline` passes.
///
/// The last sleep is clipped to the deadline, and `poll` gets one final
/// call at the deadline so a value arriving during the last interval is not
/// missed.
pub async fn poll_until<T, F>(deadline: Deadline, interval: Duration, mut poll: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if deadline.has_elapsed() {
            return None;
        }
        tokio::time::sleep(interval.min(deadline.remaining())).await;
    }
}

/// Run `future` to completion or until `deadline`, whichever is first.
pub async fn within<F: Future>(deadline: Deadline, future: F) -> Option<F::Output> {
    tokio::time::timeout_at(deadline.instant(), future).await.ok()
}

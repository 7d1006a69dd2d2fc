//! Time source for observation timestamps.

use chrono::Utc;

use crate::types::Timestamp;

/// Supplies the current time in unix seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system.
///
/// Time synchronization (NTP) is the platform's job; before sync this may
/// report an early epoch, which only shifts timestamps and never breaks the
/// ledger arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        u64::try_from(Utc::now().timestamp()).unwrap_or_default()
    }
}

//! Time source for manifest timestamps

use chrono::Utc;

/// Supplies write timestamps in whole seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

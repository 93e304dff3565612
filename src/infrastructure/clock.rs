use crate::domain::ports::Clock;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Drives expiry and period rollover in
/// tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }

    /// Moves the clock by `by`. Leaves it where it was if the result would
    /// fall outside the representable range.
    pub fn advance(&self, by: Duration) -> Result<()> {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let moved = now.checked_add_signed(by).ok_or_else(|| {
            LedgerError::ValidationError(format!("moving the clock {by} past {} is out of range", *now))
        })?;
        *now = moved;
        Ok(())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

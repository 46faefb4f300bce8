use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use std::sync::Mutex;

/// Source of the run timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

/// Format a run timestamp as `YYYY-MM-DD HH:MM:SS[.ffffff]`.
///
/// The fractional part has microsecond precision and is only present when
/// non-zero, so whole-second timestamps stay short.
pub fn format_run_ts(ts: NaiveDateTime) -> String {
    let base = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    match ts.nanosecond() / 1_000 {
        0 => base,
        micros => format!("{}.{:06}", base, micros),
    }
}

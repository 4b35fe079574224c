use chrono::Utc;

/// Wall-clock source for activity and background timestamps.
///
/// Timers run on the runtime's monotonic clock, which stops while the app is
/// suspended. Background duration is measured on this clock instead.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

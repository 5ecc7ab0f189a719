use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic-enough millisecond clock. All deadlines and audit timestamps
/// flow through this trait so tests can substitute a controllable clock
/// instead of sleeping in wall time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

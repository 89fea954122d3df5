//! Clock abstraction so time-window policy can run under virtual time in
//! tests.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used everywhere outside tests.
pub struct RealClock;

impl Default for RealClock {
    fn default() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Virtual clock advanced manually by tests.
pub struct TestClock {
    current: parking_lot::Mutex<Instant>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            current: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.current.lock();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

pub type SharedClock = std::sync::Arc<dyn Clock>;

pub fn real_clock() -> SharedClock {
    std::sync::Arc::new(RealClock)
}

pub fn test_clock() -> std::sync::Arc<TestClock> {
    std::sync::Arc::new(TestClock::new())
}

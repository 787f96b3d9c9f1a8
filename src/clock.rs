//! Time source and poll pacing shared by the launcher waits and the monitor loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Abstraction over sleeping and reading monotonic time, so polling loops can be
/// driven by a fake clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Paces a polling loop: waits a full interval while idle, and not at all after
/// an iteration that processed work, so bursts drain without delay.
#[derive(Debug, Clone)]
pub struct PollTicker {
    interval: Duration,
    next_delay: Duration,
}

impl PollTicker {
    /// The first tick waits a full interval.
    pub fn new(interval: Duration) -> Self {
        PollTicker {
            interval,
            next_delay: interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Block until the next iteration is due.
    pub fn tick(&self, clock: &dyn Clock) {
        if !self.next_delay.is_zero() {
            clock.sleep(self.next_delay);
        }
    }

    /// Record the outcome of the iteration that just ran.
    pub fn record(&mut self, had_activity: bool) {
        self.next_delay = if had_activity {
            Duration::ZERO
        } else {
            self.interval
        };
    }
}

/// Tracks the remaining budget of an optionally bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(clock: &dyn Clock, limit: Option<Duration>) -> Self {
        Deadline {
            started: clock.now(),
            limit,
        }
    }

    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_duration_since(self.started)
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        match self.limit {
            Some(limit) => self.elapsed(clock) >= limit,
            None => false,
        }
    }
}

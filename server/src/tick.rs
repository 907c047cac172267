//! Fixed-interval tick deadlines
//!
//! The scheduler alternates between polling for input until the current
//! deadline and one broadcast pass once it has passed. Deadlines advance by
//! adding the interval to the previous deadline rather than to the current
//! time, so processing overhead never accumulates as drift. Under sustained
//! overload the deadline falls behind wall-clock time and ticks fire
//! back-to-back until it catches up again.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: Duration,
    next_deadline: Instant,
    ticks: u64,
}

impl TickScheduler {
    /// Schedules the first tick one interval after `now`
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_deadline: now + interval,
            ticks: 0,
        }
    }

    /// Time left to poll before the next broadcast pass
    ///
    /// Returns `None` once the deadline has been reached, meaning the caller
    /// should broadcast and then call [`advance`](Self::advance).
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if now < self.next_deadline {
            Some(self.next_deadline - now)
        } else {
            None
        }
    }

    /// Moves the deadline forward by exactly one interval
    pub fn advance(&mut self) {
        self.next_deadline += self.interval;
        self.ticks += 1;
    }

    /// How far the current deadline trails `now`
    pub fn lag(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.next_deadline)
    }

    pub fn deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed ticks since the scheduler was created
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

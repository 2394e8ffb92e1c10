//! Cancel discipline.
//!
//! A sliding 60-second window counts cancels. At the limit the maker
//! stops replacing quotes (the resting order stays, sticky) until the
//! window rolls past old cancels.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window cancel throttle.
#[derive(Debug)]
pub struct CancelThrottle {
    window: Duration,
    max_cancels: u32,
    cancels: VecDeque<Instant>,
}

impl CancelThrottle {
    pub fn new(max_cancels: u32, window: Duration) -> Self {
        Self {
            window,
            max_cancels,
            cancels: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.cancels.front() {
            if now.duration_since(*front) >= self.window {
                self.cancels.pop_front();
            } else {
                break;
            }
        }
    }

    /// True when another cancel would exceed the limit.
    pub fn is_throttled(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.cancels.len() as u32 >= self.max_cancels
    }

    /// Record an executed cancel.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.cancels.push_back(now);
    }

    pub fn count(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.cancels.len() as u32
    }
}

//! Restart backoff and the rolling crash window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential restart backoff, capped.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    base: Duration,
    cap: Duration,
    consecutive: u32,
}

impl RestartBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            consecutive: 0,
        }
    }

    /// The delay before the next restart attempt; each call escalates.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.consecutive.min(16);
        self.consecutive = self.consecutive.saturating_add(1);
        let delay = self.base.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.cap)
    }

    /// A worker that stayed healthy resets the escalation.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Rolling window of crash timestamps, for the parking policy.
#[derive(Debug, Clone)]
pub struct RestartWindow {
    window: Duration,
    crashes: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            crashes: VecDeque::new(),
        }
    }

    /// Records a crash and returns how many fall inside the window.
    pub fn record(&mut self, now: Instant) -> usize {
        self.crashes.push_back(now);
        self.prune(now);
        self.crashes.len()
    }

    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.crashes.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.crashes.front() {
            if now.duration_since(*oldest) > self.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
    }
}

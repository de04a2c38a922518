//! Fixed-window request budget per external API
//!
//! When the budget is exhausted the caller skips its poll for the rest of
//! the window instead of queueing.

use crate::pipeline::config::RateBudgetConfig;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateBudget {
    max_requests: u32,
    window: Duration,
    used: u32,
    window_start: Option<Instant>,
}

impl RateBudget {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            used: 0,
            window_start: None,
        }
    }

    pub fn from_config(config: RateBudgetConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    fn roll(&mut self, now: Instant) {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.used = 0;
            }
        }
    }

    /// Consume one request if the current window has room
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.used >= self.max_requests {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.max_requests.saturating_sub(self.used)
    }

    /// Time until the current window resets
    pub fn resets_in(&self, now: Instant) -> Duration {
        match self.window_start {
            Some(start) => self.window.saturating_sub(now.duration_since(start)),
            None => Duration::ZERO,
        }
    }
}

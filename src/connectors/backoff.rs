use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and up to 10% jitter
///
/// delay(n) = min(initial * 2^n, max), plus jitter
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_delay_ms: initial_ms.max(1),
            max_delay_ms: max_ms.max(initial_ms.max(1)),
            current_attempt: 0,
        }
    }

    /// Base delay for the current attempt, without jitter
    pub fn base_delay(&self) -> Duration {
        let factor = 2_u64.saturating_pow(self.current_attempt.min(32));
        let delay = std::cmp::min(self.initial_delay_ms.saturating_mul(factor), self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay to wait before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        let jitter_cap = (base.as_millis() as u64) / 10;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };

        self.current_attempt = self.current_attempt.saturating_add(1);

        log::warn!(
            "⏳ Retry attempt {} in {}ms",
            self.current_attempt,
            base.as_millis() as u64 + jitter
        );

        base + Duration::from_millis(jitter)
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

//! Exponential reconnect backoff.

use embassy_time::Duration;

/// Doubling delay from `initial`, capped at `max`. Never gives up.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.next;
        let doubled = Duration::from_ticks(self.next.as_ticks().saturating_mul(2));
        self.next = if doubled > self.max { self.max } else { doubled };
        d
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

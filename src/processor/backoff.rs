use std::time::Duration;

/// Default ceiling for the inter-cycle delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared exponential backoff governing the delay between poll cycles.
///
/// Only cycle-level failures advance it. Per-call failures inside a cycle are
/// telemetry, not backoff input.
#[derive(Debug, Clone)]
pub struct BackoffController {
    base: Duration,
    max_delay: Duration,
    current: Duration,
}

impl BackoffController {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(base);
        Self {
            base,
            max_delay,
            current: base,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Resets to the base interval after a completed cycle, doubles (capped)
    /// after a failed one, and returns the new delay.
    pub fn next_delay(&mut self, cycle_succeeded: bool) -> Duration {
        self.current = if cycle_succeeded {
            self.base
        } else {
            next_backoff(self.current, self.max_delay)
        };
        self.current
    }
}

/// Time left to sleep once a cycle's own duration is subtracted.
pub fn remaining_sleep(delay: Duration, cycle_elapsed: Duration) -> Duration {
    delay.saturating_sub(cycle_elapsed)
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}

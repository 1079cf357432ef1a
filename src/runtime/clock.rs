//! Time source used by the poll loop so cycle boundaries and inter-cycle
//! sleeps can be driven without real wall-clock delays in tests.

use futures::future::BoxFuture;
#[cfg(test)]
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::{sleep, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if delay.is_zero() {
                yield_now().await;
            } else {
                sleep(delay).await;
            }
        })
    }
}

/// Virtual clock: `sleep` returns immediately after advancing `now` by the
/// requested delay, and every requested delay is recorded.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    state: Mutex<ManualState>,
}

#[cfg(test)]
#[derive(Debug)]
struct ManualState {
    now: Instant,
    sleeps: Vec<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += delta;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now += delay;
            state.sleeps.push(delay);
        }
        Box::pin(yield_now())
    }
}

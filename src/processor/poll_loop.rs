//! The long-running claim loop.
//!
//! Each cycle resolves the concurrency limit, fans out that many claim calls,
//! waits for all of them, and then sleeps for the backoff-governed delay minus
//! the time the cycle itself took. A panic anywhere in a cycle counts as a
//! failed cycle and backs off; it never ends the loop.

use super::backoff::{remaining_sleep, BackoffController};
use super::dispatcher::{panic_message, CycleReport, Dispatcher};
use super::governor::ConcurrencyPolicy;
use crate::runtime::clock::Clock;
use crate::runtime::config::ProcessorConfig;
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct PollLoopParams {
    pub policy: Arc<dyn ConcurrencyPolicy>,
    pub dispatcher: Dispatcher,
    pub clock: Arc<dyn Clock>,
    pub poll_interval: Duration,
    pub max_backoff: Duration,
}

impl PollLoopParams {
    pub fn from_config(
        config: &ProcessorConfig,
        policy: Arc<dyn ConcurrencyPolicy>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            dispatcher,
            clock,
            poll_interval: config.poll_interval(),
            max_backoff: config.max_backoff(),
        }
    }
}

pub struct PollLoop {
    policy: Arc<dyn ConcurrencyPolicy>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    backoff: BackoffController,
    cycles: u64,
}

impl PollLoop {
    pub fn new(params: PollLoopParams) -> Self {
        let PollLoopParams {
            policy,
            dispatcher,
            clock,
            poll_interval,
            max_backoff,
        } = params;

        Self {
            policy,
            dispatcher,
            clock,
            backoff: BackoffController::new(poll_interval, max_backoff),
            cycles: 0,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs a single cycle and returns how long to sleep before the next one.
    pub async fn step(&mut self) -> Duration {
        let cycle_start = self.clock.now();
        self.cycles += 1;

        let outcome = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(anyhow!(
                "poll cycle panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        let delay = self.backoff.next_delay(outcome.is_ok());
        if let Err(err) = &outcome {
            tracing::error!(
                cycle = self.cycles,
                error = %format!("{err:#}"),
                retry_in_ms = delay.as_millis() as u64,
                "poll cycle failed; backing off"
            );
        }

        let elapsed = self.clock.now().saturating_duration_since(cycle_start);
        remaining_sleep(delay, elapsed)
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let limit = self
            .policy
            .current_limit()
            .await
            .context("failed to resolve concurrency limit")?;
        self.dispatcher.dispatch_cycle(limit).await
    }

    /// Cycles until `shutdown` is cancelled. A cycle in progress is abandoned
    /// rather than drained; the remote side recovers orphaned claims.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            poll_interval_ms = self.backoff.base().as_millis() as u64,
            max_backoff_ms = self.backoff.max_delay().as_millis() as u64,
            "import job poll loop started"
        );

        loop {
            let sleep_for = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                sleep_for = self.step() => sleep_for,
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep(sleep_for) => {}
            }
        }

        tracing::info!(cycles = self.cycles, "import job poll loop stopped");
        Ok(())
    }
}

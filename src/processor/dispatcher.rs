//! Per-cycle fan-out of claim calls.
//!
//! A cycle spawns exactly `limit` claim tasks into a `JoinSet` and waits for
//! all of them. Each task records its own outcome into [`Telemetry`], and a
//! panicking call is caught inside its task so it is recorded as a failure
//! without disturbing its siblings.

use crate::job::ProcessedJob;
use crate::rpc::{ClaimError, ClaimOutcome, JobClaimer};
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    NoWork,
    Processed,
    Failed,
}

/// Per-call tallies for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub limit: usize,
    pub processed: usize,
    pub no_work: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn completed_calls(&self) -> usize {
        self.processed + self.no_work + self.failed
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    claimer: Arc<dyn JobClaimer>,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    pub fn new(claimer: Arc<dyn JobClaimer>, telemetry: Arc<Telemetry>) -> Self {
        Self { claimer, telemetry }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Runs `limit` concurrent claim calls and returns once every one has finished.
    ///
    /// Individual call failures never fail the cycle. An error is returned only
    /// when a claim task is cancelled before it could record its outcome.
    pub async fn dispatch_cycle(&self, limit: usize) -> Result<CycleReport> {
        let limit = limit.max(1);
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for call_id in 0..limit {
            let claimer = self.claimer.clone();
            let telemetry = self.telemetry.clone();
            tasks.spawn(async move { run_claim(call_id, claimer, telemetry).await });
        }

        let mut report = CycleReport {
            limit,
            ..CycleReport::default()
        };
        let mut cancelled = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(CallKind::NoWork) => report.no_work += 1,
                Ok(CallKind::Processed) => report.processed += 1,
                Ok(CallKind::Failed) => report.failed += 1,
                Err(err) => {
                    tracing::error!(error = %err, "claim task did not complete");
                    cancelled += 1;
                }
            }
        }

        report.elapsed = started.elapsed();

        if cancelled > 0 {
            bail!("{cancelled} of {limit} claim tasks were cancelled before completing");
        }

        tracing::debug!(
            limit,
            processed = report.processed,
            no_work = report.no_work,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "dispatch cycle completed"
        );

        Ok(report)
    }
}

async fn run_claim(call_id: usize, claimer: Arc<dyn JobClaimer>, telemetry: Arc<Telemetry>) -> CallKind {
    let start = Instant::now();
    let result = AssertUnwindSafe(claimer.claim_next())
        .catch_unwind()
        .await
        .unwrap_or_else(|panic_payload| {
            Err(ClaimError::TaskPanicked {
                reason: panic_message(panic_payload.as_ref()),
            })
        });
    let latency = start.elapsed();
    let latency_ms = latency.as_millis() as u64;

    match result {
        Ok(ClaimOutcome::NoWork) => {
            telemetry.record_no_work(latency);
            tracing::debug!(call = call_id, latency_ms, "no queued jobs");
            CallKind::NoWork
        }
        Ok(ClaimOutcome::Processed(body)) => {
            telemetry.record_success(latency);
            let summary = ProcessedJob::from_reply(&body);
            tracing::info!(
                call = call_id,
                latency_ms,
                job_id = ?summary.job_id,
                status = ?summary.status,
                message = ?summary.message,
                response = %body,
                "import job processed"
            );
            if !summary.status_follows_claim() {
                tracing::warn!(
                    call = call_id,
                    job_id = ?summary.job_id,
                    status = ?summary.status,
                    "processed reply reports a status a claim cannot produce"
                );
            }
            CallKind::Processed
        }
        Err(err) => {
            telemetry.record_failure(latency);
            tracing::warn!(
                call = call_id,
                latency_ms,
                error = %err,
                consecutive_errors = telemetry.consecutive_errors(),
                "claim call failed"
            );
            CallKind::Failed
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

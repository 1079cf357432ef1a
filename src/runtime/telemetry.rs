use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Interval between compact liveness lines.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(60);
/// Interval between full status reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(300);
/// Number of recent claim latencies kept for averaging.
pub const LATENCY_WINDOW: usize = 100;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Process-lifetime counters for claim attempts.
///
/// Every mutation and every snapshot takes the same lock, so concurrent
/// dispatch tasks, the health handler and the reporter never observe a torn
/// set of counters.
#[derive(Debug)]
pub struct Telemetry {
    started: Instant,
    start_time: DateTime<Utc>,
    stats: Mutex<RunStats>,
}

#[derive(Debug, Default)]
struct RunStats {
    total_jobs_processed: u64,
    successful_jobs: u64,
    failed_jobs: u64,
    empty_polls: u64,
    total_errors: u64,
    consecutive_errors: u64,
    max_consecutive_errors: u64,
    last_job_time: Option<DateTime<Utc>>,
    last_poll_time: Option<DateTime<Utc>>,
    latencies: VecDeque<Duration>,
}

impl RunStats {
    fn record_attempt(&mut self, latency: Duration) {
        self.total_jobs_processed += 1;
        self.last_poll_time = Some(Utc::now());
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            start_time: Utc::now(),
            stats: Mutex::new(RunStats::default()),
        }
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The endpoint reported an empty queue.
    pub fn record_no_work(&self, latency: Duration) {
        let mut stats = self.stats();
        stats.record_attempt(latency);
        stats.empty_polls += 1;
        stats.consecutive_errors = 0;
    }

    /// A job was claimed and driven forward.
    pub fn record_success(&self, latency: Duration) {
        let mut stats = self.stats();
        stats.record_attempt(latency);
        stats.successful_jobs += 1;
        stats.consecutive_errors = 0;
        stats.last_job_time = stats.last_poll_time;
    }

    pub fn record_failure(&self, latency: Duration) {
        let mut stats = self.stats();
        stats.record_attempt(latency);
        stats.failed_jobs += 1;
        stats.total_errors += 1;
        stats.consecutive_errors += 1;
        if stats.consecutive_errors > stats.max_consecutive_errors {
            stats.max_consecutive_errors = stats.consecutive_errors;
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.stats().consecutive_errors
    }

    pub fn total_jobs_processed(&self) -> u64 {
        self.stats().total_jobs_processed
    }

    pub fn latency_samples(&self) -> usize {
        self.stats().latencies.len()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let stats = self.stats();
        let average_latency_ms = if stats.latencies.is_empty() {
            0.0
        } else {
            let total: Duration = stats.latencies.iter().sum();
            total.as_secs_f64() * 1_000.0 / stats.latencies.len() as f64
        };

        TelemetrySnapshot {
            start_time: self.start_time,
            total_jobs_processed: stats.total_jobs_processed,
            successful_jobs: stats.successful_jobs,
            failed_jobs: stats.failed_jobs,
            empty_polls: stats.empty_polls,
            total_errors: stats.total_errors,
            consecutive_errors: stats.consecutive_errors,
            max_consecutive_errors: stats.max_consecutive_errors,
            last_job_time: stats.last_job_time,
            last_poll_time: stats.last_poll_time,
            average_latency_ms,
            latency_samples: stats.latencies.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub start_time: DateTime<Utc>,
    pub total_jobs_processed: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    pub empty_polls: u64,
    pub total_errors: u64,
    pub consecutive_errors: u64,
    pub max_consecutive_errors: u64,
    pub last_job_time: Option<DateTime<Utc>>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub average_latency_ms: f64,
    pub latency_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Liveness,
    Full,
}

/// Decides which report, if any, a reporter tick should emit.
#[derive(Debug)]
pub struct ReportSchedule {
    liveness_interval: Duration,
    report_interval: Duration,
    last_liveness: tokio::time::Instant,
    last_report: tokio::time::Instant,
}

impl ReportSchedule {
    pub fn new(
        liveness_interval: Duration,
        report_interval: Duration,
        now: tokio::time::Instant,
    ) -> Self {
        Self {
            liveness_interval,
            report_interval,
            last_liveness: now,
            last_report: now,
        }
    }

    /// A due full report also satisfies the liveness line for that tick.
    pub fn due(&mut self, now: tokio::time::Instant) -> Option<ReportKind> {
        if now.saturating_duration_since(self.last_report) >= self.report_interval {
            self.last_report = now;
            self.last_liveness = now;
            return Some(ReportKind::Full);
        }
        if now.saturating_duration_since(self.last_liveness) >= self.liveness_interval {
            self.last_liveness = now;
            return Some(ReportKind::Liveness);
        }
        None
    }
}

pub fn emit_report(kind: ReportKind, telemetry: &Telemetry) {
    let snapshot = telemetry.snapshot();
    let uptime_secs = telemetry.uptime().as_secs();

    match kind {
        ReportKind::Liveness => {
            tracing::info!(
                target: "resume_importer::metrics",
                uptime_secs,
                processed = snapshot.total_jobs_processed,
                consecutive_errors = snapshot.consecutive_errors,
                "processor alive"
            );
        }
        ReportKind::Full => {
            let memory_bytes = resident_memory_bytes();
            tracing::info!(
                target: "resume_importer::metrics",
                uptime_secs,
                processed = snapshot.total_jobs_processed,
                successful = snapshot.successful_jobs,
                failed = snapshot.failed_jobs,
                empty_polls = snapshot.empty_polls,
                total_errors = snapshot.total_errors,
                consecutive_errors = snapshot.consecutive_errors,
                max_consecutive_errors = snapshot.max_consecutive_errors,
                average_latency_ms = format!("{:.2}", snapshot.average_latency_ms),
                memory_bytes = ?memory_bytes,
                "processor status report"
            );
        }
    }
}

/// Spawns the background task that logs liveness lines and full status
/// reports on its own ticker, so a slow poll cycle never delays them.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    liveness_interval: Duration,
    report_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = liveness_interval.min(report_interval);
        let start = time::Instant::now();
        let mut schedule = ReportSchedule::new(liveness_interval, report_interval, start);
        let mut ticker = time::interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "resume_importer::metrics", "metrics reporter shutting down");
                    break;
                }
                tick = ticker.tick() => {
                    if let Some(kind) = schedule.due(tick) {
                        emit_report(kind, &telemetry);
                    }
                }
            }
        }
    })
}

#[cfg(target_os = "linux")]
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb = rest
                .split_whitespace()
                .next()
                .and_then(|value| value.parse::<u64>().ok())?;
            return kb.checked_mul(1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory_bytes() -> Option<u64> {
    None
}

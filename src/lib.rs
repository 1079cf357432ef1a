pub mod health;
pub mod job;
pub mod processor;
pub mod rpc;
pub mod runtime;

pub use health::{HealthReport, HealthServer};
pub use job::{Job, JobStatus, ProcessedJob};
pub use processor::backoff::BackoffController;
pub use processor::dispatcher::{CycleReport, Dispatcher};
pub use processor::governor::{ConcurrencyGovernor, ConcurrencyPolicy};
pub use processor::poll_loop::{PollLoop, PollLoopParams};
pub use rpc::{ClaimError, ClaimOutcome, JobClaimer, ProcessingClient, SettingsSource};
pub use runtime::config::{ProcessorConfig, ProcessorConfigBuilder};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};

//! Import job records as exposed by the job store, plus the status state
//! machine the processor relies on when interpreting claim replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a single import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Uploading,
    Importing,
    Success,
    Error,
    Cancelled,
}

impl JobStatus {
    /// `success`, `error` and `cancelled` end a claim; only a retry re-queues them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// States a job occupies while a claim is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Uploading | Self::Importing)
    }

    /// Returns whether the job store may move a job from `self` to `next`.
    ///
    /// Retries (`error|queued -> queued`) and cancellations are driven by the
    /// store on user request; the processor only ever causes `queued` to leave
    /// through a claim.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Queued, Uploading | Importing) => true,
            (Uploading | Importing, Success | Error) => true,
            (Queued | Uploading, Cancelled) => true,
            (Error | Queued, Queued) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Importing => "importing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row as returned by the store. Only `id` and `status` carry meaning
/// for the processor; the rest is descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, alias = "file_name")]
    pub file_name: Option<String>,
    #[serde(default, alias = "file_size")]
    pub file_size: Option<u64>,
    #[serde(default, alias = "file_path")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "upload_id")]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "error_details")]
    pub error_details: Option<Value>,
    #[serde(default, alias = "upload_date")]
    pub upload_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "completed_date")]
    pub completed_date: Option<DateTime<Utc>>,
}

/// Summary of a "processed" claim reply, extracted best-effort for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedJob {
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
}

impl ProcessedJob {
    /// Reads `message` and an optional `job` object (or top-level `jobId` /
    /// `status`) from a reply body. Unknown shapes yield an empty summary.
    pub fn from_reply(body: &Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if let Some(job) = body.get("job") {
            if let Ok(job) = serde_json::from_value::<Job>(job.clone()) {
                return Self {
                    job_id: Some(job.id),
                    status: Some(job.status),
                    message,
                };
            }
        }

        let job_id = body
            .get("jobId")
            .or_else(|| body.get("job_id"))
            .and_then(|value| match value {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            });
        let status = body
            .get("status")
            .and_then(|value| serde_json::from_value::<JobStatus>(value.clone()).ok());

        Self {
            job_id,
            status,
            message,
        }
    }

    /// Whether the reported status is one a claim can leave a queued job in.
    /// A reply without a status is taken at its word.
    pub fn status_follows_claim(&self) -> bool {
        self.status.map_or(true, |status| {
            if status.is_active() {
                JobStatus::Queued.can_transition_to(status)
            } else {
                status.is_terminal() && JobStatus::Importing.can_transition_to(status)
            }
        })
    }
}

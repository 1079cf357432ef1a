//! Classification of claim-and-process replies into the three outcomes the
//! processor distinguishes: no work, processed, or failure.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Message the processing endpoint returns when the queue is empty.
pub const NO_QUEUED_JOBS_MESSAGE: &str = "No queued jobs";

/// Successful (non-failure) result of a single claim call.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The endpoint found no `queued` job to claim.
    NoWork,
    /// A job was claimed and driven forward; the reply body is kept for logging.
    Processed(Value),
}

/// Why a single claim call counts as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("processing endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("processing endpoint returned an HTML document (HTTP {status})")]
    HtmlBody { status: u16 },
    #[error("processing endpoint returned a malformed body: {reason}")]
    MalformedBody { reason: String },
    #[error("processing request timed out")]
    Timeout,
    #[error("processing request failed: {reason}")]
    Transport { reason: String },
    #[error("claim task panicked: {reason}")]
    TaskPanicked { reason: String },
}

impl ClaimError {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport {
                reason: err.to_string(),
            }
        }
    }
}

/// Classifies a completed HTTP exchange.
///
/// Non-2xx statuses fail before the body is inspected. A 2xx body that is not
/// valid JSON is a failure too, whether or not it looks like HTML.
pub fn classify_response(
    status: StatusCode,
    body: &str,
    preview_bytes: usize,
) -> Result<ClaimOutcome, ClaimError> {
    if !status.is_success() {
        if looks_like_html(body) {
            return Err(ClaimError::HtmlBody {
                status: status.as_u16(),
            });
        }
        return Err(ClaimError::Status {
            status: status.as_u16(),
            body: preview(body, preview_bytes),
        });
    }

    if looks_like_html(body) {
        return Err(ClaimError::HtmlBody {
            status: status.as_u16(),
        });
    }

    let value: Value =
        serde_json::from_str(body).map_err(|err| ClaimError::MalformedBody {
            reason: err.to_string(),
        })?;

    if is_no_work_reply(&value) {
        Ok(ClaimOutcome::NoWork)
    } else {
        Ok(ClaimOutcome::Processed(value))
    }
}

fn is_no_work_reply(value: &Value) -> bool {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(|message| message.trim().eq_ignore_ascii_case(NO_QUEUED_JOBS_MESSAGE))
        .unwrap_or(false)
}

pub(crate) fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

pub(crate) fn preview(body: &str, max_bytes: usize) -> String {
    let body = body.trim();
    if body.len() <= max_bytes {
        return body.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

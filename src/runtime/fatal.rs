use anyhow::Error as AnyError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// First unrecoverable background failure seen by a [`FatalErrorHandler`].
#[derive(Debug, Clone, Error)]
#[error("{context} failed: {message}")]
pub struct FatalError {
    pub context: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Captures the first unrecoverable background failure (poll loop exit or
/// panic, health listener crash) and cancels the root shutdown token so the
/// runner can surface it as a non-zero exit.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    root_shutdown: CancellationToken,
    first: Mutex<Option<FatalError>>,
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                root_shutdown,
                first: Mutex::new(None),
            }),
        }
    }

    /// Records `error` if nothing was recorded yet, then cancels the root
    /// token. Later errors are only logged.
    pub fn trigger(&self, context: &str, error: AnyError) {
        let message = format!("{error:#}");
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::warn!(context, error = %message, "additional fatal error after shutdown began");
            return;
        }

        tracing::error!(context, error = %message, "fatal processor error; initiating shutdown");

        *self
            .inner
            .first
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(FatalError {
            context: context.to_owned(),
            message,
            occurred_at: Utc::now(),
        });

        self.inner.root_shutdown.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<FatalError> {
        self.inner
            .first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

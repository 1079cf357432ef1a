//! Resolves how many claim calls a poll cycle may run at once.

use crate::rpc::SettingsSource;
use crate::runtime::config::{parse_positive, ProcessorConfig};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Fallback limit when neither an override nor a remote setting applies.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Seam used by the poll loop to obtain a per-cycle concurrency budget.
///
/// An `Err` is treated as a systemic cycle failure and triggers backoff.
pub trait ConcurrencyPolicy: Send + Sync {
    fn current_limit(&self) -> BoxFuture<'_, Result<usize>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    Override,
    RemoteSetting,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimit {
    pub limit: usize,
    pub source: LimitSource,
}

pub struct ConcurrencyGovernor {
    override_limit: Option<usize>,
    settings: Option<Arc<dyn SettingsSource>>,
    setting_key: String,
    default_limit: usize,
}

impl ConcurrencyGovernor {
    pub fn new(
        override_limit: Option<usize>,
        settings: Option<Arc<dyn SettingsSource>>,
        setting_key: impl Into<String>,
        default_limit: usize,
    ) -> Self {
        Self {
            override_limit: override_limit.filter(|limit| *limit > 0),
            settings,
            setting_key: setting_key.into(),
            default_limit: default_limit.max(1),
        }
    }

    pub fn from_config(config: &ProcessorConfig, settings: Arc<dyn SettingsSource>) -> Self {
        Self::new(
            config.concurrency_override(),
            Some(settings),
            config.concurrency_setting_key(),
            config.default_concurrency(),
        )
    }

    /// Override first, then the remote setting, then the default. Lookup
    /// failures and unusable values fall back to the default.
    pub async fn resolve(&self) -> ResolvedLimit {
        if let Some(limit) = self.override_limit {
            return ResolvedLimit {
                limit,
                source: LimitSource::Override,
            };
        }

        if let Some(settings) = &self.settings {
            match settings.fetch_setting(&self.setting_key).await {
                Ok(Some(raw)) => match parse_positive(&raw) {
                    Some(limit) => {
                        return ResolvedLimit {
                            limit,
                            source: LimitSource::RemoteSetting,
                        }
                    }
                    None => tracing::warn!(
                        key = %self.setting_key,
                        value = %raw,
                        fallback = self.default_limit,
                        "remote concurrency setting is not a positive integer"
                    ),
                },
                Ok(None) => tracing::debug!(
                    key = %self.setting_key,
                    fallback = self.default_limit,
                    "remote concurrency setting not present"
                ),
                Err(err) => tracing::warn!(
                    key = %self.setting_key,
                    error = %err,
                    fallback = self.default_limit,
                    "failed to read remote concurrency setting"
                ),
            }
        }

        ResolvedLimit {
            limit: self.default_limit,
            source: LimitSource::Default,
        }
    }
}

impl ConcurrencyPolicy for ConcurrencyGovernor {
    fn current_limit(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let resolved = self.resolve().await;
            tracing::trace!(
                limit = resolved.limit,
                source = ?resolved.source,
                "resolved concurrency limit"
            );
            Ok(resolved.limit)
        })
    }
}

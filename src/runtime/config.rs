use crate::processor::backoff::DEFAULT_MAX_BACKOFF;
use crate::processor::governor::DEFAULT_CONCURRENCY;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_API_KEY: &str = "IMPORTER_API_KEY";
pub const ENV_PROCESS_URL: &str = "IMPORTER_PROCESS_URL";
pub const ENV_SETTINGS_URL: &str = "IMPORTER_SETTINGS_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "IMPORTER_POLL_INTERVAL_MS";
pub const ENV_HEALTH_PORT: &str = "IMPORTER_HEALTH_PORT";
pub const ENV_HEALTH_HOST: &str = "IMPORTER_HEALTH_HOST";
pub const ENV_MAX_CONCURRENCY: &str = "IMPORTER_MAX_CONCURRENCY";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "IMPORTER_REQUEST_TIMEOUT_SECS";
pub const ENV_MAX_BACKOFF_SECS: &str = "IMPORTER_MAX_BACKOFF_SECS";

const DEFAULT_PROCESS_URL: &str = "http://localhost:3000/api/import-jobs/process";
const DEFAULT_SETTINGS_URL: &str = "http://localhost:3000/api/settings";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_HEALTH_PORT: u16 = 3001;
const DEFAULT_HEALTH_HOST: &str = "0.0.0.0";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONCURRENCY_SETTING_KEY: &str = "max_concurrent_processors";

/// Runtime configuration for the import processor.
///
/// All instances must be constructed via [`ProcessorConfig::builder`] or
/// [`ProcessorConfig::from_env`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    api_key: String,
    process_url: String,
    settings_url: String,
    poll_interval: Duration,
    max_backoff: Duration,
    health_host: IpAddr,
    health_port: u16,
    concurrency_override: Option<usize>,
    default_concurrency: usize,
    concurrency_setting_key: String,
    request_timeout: Duration,
    liveness_interval: Duration,
    report_interval: Duration,
}

impl ProcessorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::default()
    }

    /// Reads the `IMPORTER_*` environment variables.
    ///
    /// A missing or blank API key is an error. A malformed concurrency override
    /// is logged and ignored so the remote setting can still apply.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut builder = Self::builder();
        let api_key = read(ENV_API_KEY)
            .with_context(|| format!("{ENV_API_KEY} must be set to the processor API key"))?;
        builder = builder.api_key(api_key);

        if let Some(url) = read(ENV_PROCESS_URL) {
            builder = builder.process_url(url);
        }
        if let Some(url) = read(ENV_SETTINGS_URL) {
            builder = builder.settings_url(url);
        }
        if let Some(ms) = parse_optional::<u64>(ENV_POLL_INTERVAL_MS, &read)? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_optional::<u64>(ENV_MAX_BACKOFF_SECS, &read)? {
            builder = builder.max_backoff(Duration::from_secs(secs));
        }
        if let Some(port) = parse_optional::<u16>(ENV_HEALTH_PORT, &read)? {
            builder = builder.health_port(port);
        }
        if let Some(host) = parse_optional::<IpAddr>(ENV_HEALTH_HOST, &read)? {
            builder = builder.health_host(host);
        }
        if let Some(secs) = parse_optional::<u64>(ENV_REQUEST_TIMEOUT_SECS, &read)? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = read(ENV_MAX_CONCURRENCY) {
            match parse_positive(&raw) {
                Some(limit) => builder = builder.concurrency_override(limit),
                None => tracing::warn!(
                    key = ENV_MAX_CONCURRENCY,
                    value = %raw,
                    "ignoring concurrency override that is not a positive integer"
                ),
            }
        }

        builder.build()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// URL of the claim-and-process endpoint.
    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    /// URL of the runtime settings list.
    pub fn settings_url(&self) -> &str {
        &self.settings_url
    }

    /// Base inter-cycle delay; backoff resets to this value.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Backoff ceiling, never below the base interval.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff.max(self.poll_interval)
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.health_host, self.health_port)
    }

    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    pub fn concurrency_override(&self) -> Option<usize> {
        self.concurrency_override
    }

    pub fn default_concurrency(&self) -> usize {
        self.default_concurrency
    }

    /// Name of the remote setting holding the concurrency limit.
    pub fn concurrency_setting_key(&self) -> &str {
        &self.concurrency_setting_key
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn liveness_interval(&self) -> Duration {
        self.liveness_interval
    }

    pub fn report_interval(&self) -> Duration {
        self.report_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.api_key, "api_key")?;
        validate_url(&self.process_url, "process_url")?;
        validate_url(&self.settings_url, "settings_url")?;
        ensure_not_empty(&self.concurrency_setting_key, "concurrency_setting_key")?;

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.max_backoff.is_zero() {
            bail!("max_backoff must be greater than 0");
        }

        if self.concurrency_override == Some(0) {
            bail!("concurrency_override must be greater than 0");
        }

        if self.default_concurrency == 0 {
            bail!("default_concurrency must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.liveness_interval.is_zero() {
            bail!("liveness_interval must be greater than 0");
        }

        if self.report_interval.is_zero() {
            bail!("report_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcessorConfigBuilder {
    api_key: Option<String>,
    process_url: Option<String>,
    settings_url: Option<String>,
    poll_interval: Option<Duration>,
    max_backoff: Option<Duration>,
    health_host: Option<IpAddr>,
    health_port: Option<u16>,
    concurrency_override: Option<usize>,
    default_concurrency: Option<usize>,
    concurrency_setting_key: Option<String>,
    request_timeout: Option<Duration>,
    liveness_interval: Option<Duration>,
    report_interval: Option<Duration>,
}

impl ProcessorConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn process_url(mut self, url: impl Into<String>) -> Self {
        self.process_url = Some(url.into());
        self
    }

    pub fn settings_url(mut self, url: impl Into<String>) -> Self {
        self.settings_url = Some(url.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn max_backoff(mut self, ceiling: Duration) -> Self {
        self.max_backoff = Some(ceiling);
        self
    }

    pub fn health_host(mut self, host: IpAddr) -> Self {
        self.health_host = Some(host);
        self
    }

    pub fn health_port(mut self, port: u16) -> Self {
        self.health_port = Some(port);
        self
    }

    pub fn concurrency_override(mut self, limit: usize) -> Self {
        self.concurrency_override = Some(limit);
        self
    }

    pub fn default_concurrency(mut self, limit: usize) -> Self {
        self.default_concurrency = Some(limit);
        self
    }

    pub fn concurrency_setting_key(mut self, key: impl Into<String>) -> Self {
        self.concurrency_setting_key = Some(key.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = Some(interval);
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ProcessorConfig> {
        let health_host = match self.health_host {
            Some(host) => host,
            None => DEFAULT_HEALTH_HOST
                .parse()
                .context("default health host is not an IP address")?,
        };

        let config = ProcessorConfig {
            api_key: trimmed_string(self.api_key.context("api_key is required")?),
            process_url: trimmed_string(
                self.process_url
                    .unwrap_or_else(|| DEFAULT_PROCESS_URL.to_owned()),
            ),
            settings_url: trimmed_string(
                self.settings_url
                    .unwrap_or_else(|| DEFAULT_SETTINGS_URL.to_owned()),
            ),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            max_backoff: self
                .max_backoff
                .unwrap_or(DEFAULT_MAX_BACKOFF),
            health_host,
            health_port: self.health_port.unwrap_or(DEFAULT_HEALTH_PORT),
            concurrency_override: self.concurrency_override,
            default_concurrency: self.default_concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            concurrency_setting_key: self
                .concurrency_setting_key
                .unwrap_or_else(|| DEFAULT_CONCURRENCY_SETTING_KEY.to_owned()),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            liveness_interval: self
                .liveness_interval
                .unwrap_or(telemetry::DEFAULT_LIVENESS_INTERVAL),
            report_interval: self
                .report_interval
                .unwrap_or(telemetry::DEFAULT_REPORT_INTERVAL),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Parses a positive integer, tolerating surrounding whitespace.
pub(crate) fn parse_positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

fn parse_optional<T>(key: &str, read: &dyn Fn(&str) -> Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    read(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("failed to parse {key}='{value}'"))
        })
        .transpose()
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

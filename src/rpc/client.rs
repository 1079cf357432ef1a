//! HTTP client for the remote processing and settings endpoints. Houses the
//! `ProcessingClient` plus the `JobClaimer` and `SettingsSource` traits the
//! processor consumes so tests can swap in scripted fakes.

use crate::rpc::auth::build_auth_headers;
use crate::rpc::options::ClientOptions;
use crate::rpc::outcome::{classify_response, preview, ClaimError, ClaimOutcome};
use crate::runtime::config::ProcessorConfig;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Claims the next queued job at the remote endpoint and drives it forward.
pub trait JobClaimer: Send + Sync {
    fn claim_next(&self) -> BoxFuture<'_, Result<ClaimOutcome, ClaimError>>;
}

/// Looks up a named runtime setting.
pub trait SettingsSource: Send + Sync {
    fn fetch_setting<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
}

#[derive(Debug, Deserialize)]
struct SettingEntry {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone)]
pub struct ProcessingClient {
    process_url: Arc<String>,
    settings_url: Arc<String>,
    client: reqwest::Client,
    options: ClientOptions,
}

impl JobClaimer for ProcessingClient {
    fn claim_next(&self) -> BoxFuture<'_, Result<ClaimOutcome, ClaimError>> {
        Box::pin(self.claim_next())
    }
}

impl SettingsSource for ProcessingClient {
    fn fetch_setting<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.fetch_setting(key))
    }
}

impl ProcessingClient {
    pub fn new(
        process_url: impl Into<String>,
        settings_url: impl Into<String>,
        api_key: &str,
    ) -> Result<Self> {
        Self::with_options(process_url, settings_url, api_key, ClientOptions::default())
    }

    pub fn with_options(
        process_url: impl Into<String>,
        settings_url: impl Into<String>,
        api_key: &str,
        options: ClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let headers = build_auth_headers(api_key)?;
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build processing client: {err}"))?;

        Ok(Self {
            process_url: Arc::new(process_url.into()),
            settings_url: Arc::new(settings_url.into()),
            client,
            options,
        })
    }

    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let options = ClientOptions {
            request_timeout: config.request_timeout(),
            ..ClientOptions::default()
        };
        Self::with_options(
            config.process_url().to_owned(),
            config.settings_url().to_owned(),
            config.api_key(),
            options,
        )
    }

    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    pub fn settings_url(&self) -> &str {
        &self.settings_url
    }

    /// Issues one `POST` against the processing endpoint and classifies the reply.
    pub async fn claim_next(&self) -> Result<ClaimOutcome, ClaimError> {
        let response = self
            .client
            .post(self.process_url.as_str())
            .send()
            .await
            .map_err(|err| ClaimError::from_reqwest(&err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ClaimError::from_reqwest(&err))?;

        classify_response(status, &body, self.options.error_body_preview_bytes)
    }

    /// Fetches the settings list and returns the raw value stored under `key`.
    pub async fn fetch_setting(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.settings_url.as_str())
            .send()
            .await
            .context("settings request failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read settings response")?;

        if !status.is_success() {
            return Err(anyhow!(
                "settings endpoint returned HTTP {}: {}",
                status.as_u16(),
                preview(&body, self.options.error_body_preview_bytes)
            ));
        }

        let entries: Vec<SettingEntry> =
            serde_json::from_str(&body).context("settings response is not a key/value list")?;

        Ok(find_setting(&entries, key))
    }
}

fn find_setting(entries: &[SettingEntry], key: &str) -> Option<String> {
    entries
        .iter()
        .find(|entry| entry.key == key)
        .and_then(|entry| match &entry.value {
            Value::Null => None,
            Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        })
}

//! Header helpers for wiring the static processor API key into every outbound
//! request issued by the `reqwest` client.

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

pub const API_KEY_HEADER: &str = "x-api-key";

pub(crate) fn build_auth_headers(api_key: &str) -> Result<HeaderMap> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("api key cannot be empty");
    }

    let mut headers = HeaderMap::new();
    let mut value =
        HeaderValue::from_str(api_key).context("failed to build API key header value")?;
    value.set_sensitive(true);
    headers.insert(API_KEY_HEADER, value);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

//! The crawling agent: HTTP client, fetch path, and the crawl loop

pub mod fetch;
pub mod runner;

use crate::config::AgentConfig;
use crate::{ConfigError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;

/// Builds the HTTP client used for every request this agent makes
///
/// Configured headers (including the derived `User-Agent`) become
/// default headers. TLS verification can be disabled with
/// `verify=false` for hosts with broken certificates; this is logged
/// loudly since it applies to the whole client.
pub fn build_http_client(config: &AgentConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::InvalidHeader(value.clone()))?;
        headers.insert(name, value);
    }

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if !config.verify {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

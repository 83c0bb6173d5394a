//! HTTP script fetcher.
//!
//! Downloads the analytics library over the network the way a browser's
//! script loader would. Any failure is reported as [`FetchError::Network`]
//! and otherwise ignored by the loader.

use std::time::Duration;

use anyhow::Context;
use consentry_core::analytics::ScriptFetcher;
use consentry_core::error::FetchError;

/// Fetches scripts with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("consentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ScriptFetcher for HttpFetcher {
    async fn fetch(&self, src: &str) -> Result<(), FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            src: src.to_owned(),
            reason: e.to_string(),
        };

        self.client
            .get(src)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network)?
            .bytes()
            .await
            .map_err(network)?;
        Ok(())
    }
}

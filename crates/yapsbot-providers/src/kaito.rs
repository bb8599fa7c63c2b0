//! Kaito Yaps API client.
//!
//! `GET {api_url}?username=<handle>` returns the score payload. A 404 means
//! the handle has no data on Kaito and is reported as `Ok(None)`.

use async_trait::async_trait;
use std::time::Duration;
use yapsbot_core::config::KaitoConfig;
use yapsbot_core::error::{Result, YapsError};
use yapsbot_core::traits::ScoreSource;
use yapsbot_core::types::ScoreSnapshot;

/// HTTP client for the Kaito Yaps endpoint.
#[derive(Clone)]
pub struct KaitoClient {
    api_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl KaitoClient {
    pub fn new(api_url: &str, timeout: Duration) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &KaitoConfig) -> Self {
        Self::new(&config.api_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch the Yaps score of one handle.
    pub async fn get_yaps(&self, handle: &str) -> Result<Option<ScoreSnapshot>> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("username", handle)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| YapsError::Http(format!("Kaito request for {handle} failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| YapsError::Http(format!("Kaito body for {handle} unreadable: {e}")))?;

        let result = interpret_response(handle, status, &body);
        if let Ok(None) = result {
            tracing::warn!("Twitter user {handle} not found on Kaito");
        }
        result
    }
}

/// Map an HTTP status + body to the source contract.
fn interpret_response(handle: &str, status: u16, body: &str) -> Result<Option<ScoreSnapshot>> {
    match status {
        404 => Ok(None),
        200..=299 => {
            let snapshot: ScoreSnapshot = serde_json::from_str(body)?;
            Ok(Some(snapshot))
        }
        _ => {
            let snippet: String = body.chars().take(200).collect();
            Err(YapsError::Api(format!(
                "Kaito returned {status} for {handle}: {snippet}"
            )))
        }
    }
}

#[async_trait]
impl ScoreSource for KaitoClient {
    async fn fetch(&self, handle: &str) -> Result<Option<ScoreSnapshot>> {
        self.get_yaps(handle).await
    }
}

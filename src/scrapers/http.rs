use crate::scrapers::types::ScrapeError;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Plain HTTP page fetcher with a fixed per-request timeout
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, timeout })
    }

    /// GET a page and return its body; non-2xx statuses are errors.
    pub async fn get_html(&self, url: &str) -> Result<String, ScrapeError> {
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let html = response.text().await.map_err(|e| self.classify(e))?;
        debug!("Downloaded {} bytes of HTML", html.len());

        Ok(html)
    }

    fn classify(&self, err: reqwest::Error) -> ScrapeError {
        if err.is_timeout() {
            ScrapeError::Timeout(self.timeout)
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

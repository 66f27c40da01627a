use crate::traits::{FeedClient, PageClient};
use crate::types::{FetchConfig, RelayError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{header, Client, Response};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared HTTP transport for feed documents and article pages.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.config.retry_delay,
            initial_interval: self.config.retry_delay,
            max_interval: self.config.retry_delay * 8,
            multiplier: 2.0,
            max_elapsed_time: Some(self.config.feed_timeout * (self.config.max_retries + 1)),
            ..Default::default()
        }
    }

    async fn get_feed_once(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.feed_timeout)
            .header(
                header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

/// Client errors will not go away on retry.
fn is_retryable(error: &RelayError) -> bool {
    match error {
        RelayError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
        RelayError::Http(e) => !e.is_builder(),
        _ => false,
    }
}

#[async_trait]
impl FeedClient for Fetcher {
    async fn fetch_feed(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        let mut backoff = self.retry_policy();
        let mut attempt = 0;

        debug!("Fetching feed: {}", url);

        loop {
            let outcome = match self.get_feed_once(url).await {
                Ok(response) => response.text().await.map_err(RelayError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(content) => {
                    info!(
                        "Fetched feed {} ({} bytes, {} ms)",
                        url,
                        content.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(content);
                }
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    match backoff.next_backoff() {
                        Some(delay) => {
                            warn!("Attempt {} failed for {}: {}; retrying in {:?}", attempt + 1, url, e, delay);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PageClient for Fetcher {
    async fn fetch_prefix(&self, url: &str, max_bytes: usize) -> Result<String> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.config.page_timeout)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(header::RANGE, format!("bytes=0-{}", max_bytes))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Servers that ignore Range still get cut off here.
        let mut body = Vec::with_capacity(max_bytes.min(64 * 1024));
        while let Some(chunk) = response.chunk().await? {
            let remaining = max_bytes - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= max_bytes {
                break;
            }
        }

        debug!("Read {} bytes of {}", body.len(), url);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

//! Attachment downloads

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::config::DownloadConfig;
use super::models::AttachmentBlob;
use super::{IngestError, Result};

/// Resolves an attachment URL to its bytes
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Download the full body at `url`
    ///
    /// Fails with [`IngestError::DownloadFailed`], which aborts the batch.
    async fn fetch(&self, url: &str) -> Result<AttachmentBlob>;
}

/// One failed attempt, and whether another attempt could succeed
struct AttemptError {
    reason: String,
    retryable: bool,
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            reason: e.to_string(),
            retryable: !e.is_builder(),
        }
    }
}

/// HTTP(S) fetcher with a per-request timeout and bounded retries
pub struct HttpAttachmentFetcher {
    client: Client,
    config: DownloadConfig,
}

impl HttpAttachmentFetcher {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("formsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn download_once(&self, url: &str) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError {
                reason: format!("HTTP error: {}", status),
                retryable: is_transient(status),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Server errors, timeouts and throttling may clear up on their own
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(&self, url: &str) -> Result<AttachmentBlob> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.download_once(url).await {
                Ok(bytes) => {
                    debug!(url, bytes = bytes.len(), attempt, "Downloaded attachment");
                    return Ok(AttachmentBlob::from(bytes));
                },
                Err(e) if e.retryable && attempt < attempts => {
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "Download attempt {}/{} for {} failed: {}",
                        attempt, attempts, url, e.reason
                    );
                    info!("Retrying in {} ms...", backoff.as_millis());
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                },
                Err(e) => {
                    warn!(url, attempt, "Giving up on attachment: {}", e.reason);
                    return Err(IngestError::download(url, e.reason));
                },
            }
        }
    }
}

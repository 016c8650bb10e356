//! Record source: the form-response spreadsheet
//!
//! Talks to the Sheets v4 `values` endpoints. Reads return a rectangular
//! array of cells starting below the header row; clears wipe the same
//! columns for the rows that were read.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::auth::{ServiceAccountAuth, TokenProvider};
use super::config::SheetsConfig;
use super::models::{Batch, SubmissionRow, SUBMISSION_COLUMNS};
use super::{IngestError, Result};

/// Failures talking to the spreadsheet API
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("spreadsheet API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Where submissions come from
///
/// Implementations hold no state the pipeline depends on: every call is a
/// fresh remote operation against the source of truth.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Read every pending row below the header
    ///
    /// Returns an empty batch when nothing is pending. Fails with
    /// [`IngestError::SourceUnavailable`]; partial results are never returned.
    async fn fetch_rows(&self) -> Result<Batch>;

    /// Clear the first `row_count` data rows of `sheet`, leaving the header
    ///
    /// Fails with [`IngestError::ClearFailed`], which callers only log.
    async fn clear_rows(&self, sheet: &str, row_count: usize) -> Result<()>;

    /// Sheet the rows are read from
    fn sheet_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// [`RecordSource`] backed by the Google Sheets API
pub struct SheetsClient {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
    config: SheetsConfig,
}

impl SheetsClient {
    /// Build a client authenticating with the configured service account
    pub fn new(config: SheetsConfig) -> std::result::Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("formsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let auth = ServiceAccountAuth::new(client.clone(), &config)?;

        Ok(Self::with_token_provider(client, config, Arc::new(auth)))
    }

    pub fn with_token_provider(
        client: Client,
        config: SheetsConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            tokens,
            config,
        }
    }

    fn values_url(&self, range: &str) -> std::result::Result<Url, SourceError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| SourceError::InvalidResponse(format!("bad API base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidResponse("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values", range]);

        Ok(url)
    }

    async fn check(response: Response) -> std::result::Result<Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SourceError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_values(&self, range: &str) -> std::result::Result<Vec<Vec<Value>>, SourceError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.values_url(range)?)
            .query(&[("majorDimension", "ROWS")])
            .bearer_auth(token)
            .send()
            .await?;

        let body: ValueRange = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("value range: {}", e)))?;

        Ok(body.values)
    }

    async fn clear_values(&self, range: &str) -> std::result::Result<(), SourceError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(self.values_url(&format!("{}:clear", range))?)
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordSource for SheetsClient {
    #[instrument(skip(self), fields(spreadsheet = %self.config.spreadsheet_id))]
    async fn fetch_rows(&self) -> Result<Batch> {
        let range = self.config.read_range();
        let values = self
            .get_values(&range)
            .await
            .map_err(IngestError::SourceUnavailable)?;

        let batch: Batch = values
            .into_iter()
            .map(|mut cells| {
                cells.truncate(SUBMISSION_COLUMNS);
                SubmissionRow(cells)
            })
            .collect();

        debug!(range = %range, rows = batch.len(), "Read submission rows");
        Ok(batch)
    }

    #[instrument(skip(self), fields(spreadsheet = %self.config.spreadsheet_id))]
    async fn clear_rows(&self, sheet: &str, row_count: usize) -> Result<()> {
        let range = self.config.clear_range(sheet, row_count);
        self.clear_values(&range)
            .await
            .map_err(IngestError::ClearFailed)?;

        info!(range = %range, "Cleared consumed rows from spreadsheet");
        Ok(())
    }

    fn sheet_name(&self) -> &str {
        &self.config.sheet_name
    }
}

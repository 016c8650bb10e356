//! Submission ingestion
//!
//! Polls the form-response spreadsheet, downloads the attachments each
//! response links to, stores everything in one transaction per batch and
//! clears the consumed rows.
//!
//! # Architecture
//!
//! - **config**: `INGEST_*` / `SHEETS_*` settings
//! - **models**: raw rows, validated submissions, stored records, cycle reports
//! - **auth**: service-account token exchange for the spreadsheet API
//! - **source**: [`RecordSource`] and the Sheets-backed [`SheetsClient`]
//! - **fetcher**: [`AttachmentFetcher`] and the HTTP implementation
//! - **sink**: [`RecordSink`] and the PostgreSQL implementation
//! - **pipeline**: one poll cycle, serialised across callers
//! - **scheduler**: the cancellable background poll loop

pub mod auth;
pub mod config;
pub mod fetcher;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClearMode, DownloadConfig, IngestConfig, SheetsConfig};
pub use fetcher::{AttachmentFetcher, HttpAttachmentFetcher};
pub use models::{
    AttachmentBlob, Batch, CycleOutcome, CycleReport, RecordId, StoredRecord, Submission,
    SubmissionRow,
};
pub use pipeline::IngestionPipeline;
pub use scheduler::IngestScheduler;
pub use sink::{PgSink, RecordSink, SinkTransaction};
pub use source::{RecordSource, SheetsClient, SourceError};

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Ingestion failures
///
/// Only `ClearFailed` is tolerated by the pipeline; every other variant
/// raised while a batch is open rolls the batch back.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Record source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Insert failed: {0}")]
    InsertFailed(#[source] sqlx::Error),

    #[error("Clearing source rows failed: {0}")]
    ClearFailed(#[source] SourceError),

    #[error("Record sink unavailable: {0}")]
    SinkUnavailable(#[source] sqlx::Error),

    #[error("An ingestion cycle is already running")]
    CycleInProgress,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn download(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

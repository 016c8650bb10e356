//! One ingestion cycle
//!
//! A cycle reads the pending rows, opens a single transaction, and for each
//! row in order validates it, downloads its attachments and inserts it. Any
//! download or insert failure rolls the whole batch back. Rows are cleared
//! from the source after the commit (or after each insert in
//! [`ClearMode::PerRow`]).
//!
//! Cycles never overlap: [`IngestionPipeline::run_cycle`] waits for the
//! running cycle, [`IngestionPipeline::try_run_cycle`] refuses instead.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::config::ClearMode;
use super::fetcher::AttachmentFetcher;
use super::models::{AttachmentBlob, Batch, CycleOutcome, CycleReport, StoredRecord};
use super::sink::{RecordSink, SinkTransaction};
use super::source::RecordSource;
use super::{IngestError, Result};

pub struct IngestionPipeline {
    source: Arc<dyn RecordSource>,
    fetcher: Arc<dyn AttachmentFetcher>,
    sink: Arc<dyn RecordSink>,
    clear_mode: ClearMode,
    cycle: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        fetcher: Arc<dyn AttachmentFetcher>,
        sink: Arc<dyn RecordSink>,
        clear_mode: ClearMode,
    ) -> Self {
        Self {
            source,
            fetcher,
            sink,
            clear_mode,
            cycle: Mutex::new(()),
        }
    }

    /// Run one cycle, waiting for any cycle already in progress
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _running = self.cycle.lock().await;
        self.execute().await
    }

    /// Run one cycle unless one is already in progress
    ///
    /// Fails with [`IngestError::CycleInProgress`] instead of queueing.
    pub async fn try_run_cycle(&self) -> Result<CycleReport> {
        let _running = self
            .cycle
            .try_lock()
            .map_err(|_| IngestError::CycleInProgress)?;
        self.execute().await
    }

    pub fn is_running(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    /// Errors returned here happened before a transaction was opened;
    /// failures inside the batch come back as a rolled-back report.
    #[instrument(skip(self), fields(clear_mode = ?self.clear_mode))]
    async fn execute(&self) -> Result<CycleReport> {
        let batch = self.source.fetch_rows().await?;
        if batch.is_empty() {
            debug!("No pending submissions");
            return Ok(CycleReport::empty());
        }

        info!(rows = batch.len(), "Processing submission batch");

        let mut report = CycleReport {
            rows_read: batch.len(),
            inserted: 0,
            skipped: 0,
            cleared: false,
            outcome: CycleOutcome::Committed,
        };

        let mut tx = self.sink.begin().await?;

        if let Err(e) = self.process_batch(tx.as_mut(), &batch, &mut report).await {
            error!(error = %e, "Batch aborted, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Rollback failed");
            }
            return Ok(report.rolled_back(&e));
        }

        if let Err(e) = tx.commit().await {
            error!(error = %e, "Commit failed");
            return Ok(report.rolled_back(&e));
        }

        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Submission batch committed"
        );

        if self.clear_mode == ClearMode::AfterCommit && report.inserted > 0 {
            report.cleared = self.clear_source(batch.len()).await;
        }

        Ok(report)
    }

    async fn process_batch(
        &self,
        tx: &mut dyn SinkTransaction,
        batch: &Batch,
        report: &mut CycleReport,
    ) -> Result<()> {
        for (index, row) in batch.iter().enumerate() {
            let submission = match row.validate() {
                Ok(submission) => submission,
                Err(reason) => {
                    warn!(row = index, %reason, "Skipping invalid row");
                    report.skipped += 1;
                    continue;
                },
            };

            let (download, authorization_letter) = tokio::try_join!(
                self.resolve(submission.download_url.as_deref()),
                self.resolve(submission.authorization_letter_url.as_deref()),
            )?;

            let record = StoredRecord::from_submission(submission, download, authorization_letter);
            let id = tx.insert_record(&record).await?;
            report.inserted += 1;
            debug!(row = index, %id, "Inserted submission");

            if self.clear_mode == ClearMode::PerRow {
                report.cleared |= self.clear_source(batch.len()).await;
            }
        }

        Ok(())
    }

    async fn resolve(&self, url: Option<&str>) -> Result<Option<AttachmentBlob>> {
        match url {
            Some(url) => self.fetcher.fetch(url).await.map(Some),
            None => Ok(None),
        }
    }

    /// Clear the rows just read; failures are logged and otherwise ignored
    async fn clear_source(&self, rows: usize) -> bool {
        let sheet = self.source.sheet_name();
        match self.source.clear_rows(sheet, rows).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, sheet, "Failed to clear consumed rows");
                false
            },
        }
    }
}

impl CycleReport {
    /// Nothing from a rolled-back batch is stored
    fn rolled_back(mut self, error: &IngestError) -> Self {
        self.inserted = 0;
        self.outcome = CycleOutcome::RolledBack {
            error: error.to_string(),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::models::SubmissionRow;
    use crate::ingest::testing::{row, FakeFetcher, FakeSink, FakeSource, Journal};
    use serde_json::Value;

    struct Harness {
        journal: Journal,
        source: Arc<FakeSource>,
        fetcher: Arc<FakeFetcher>,
        sink: FakeSink,
        pipeline: IngestionPipeline,
    }

    fn harness(rows: Batch, clear_mode: ClearMode) -> Harness {
        let journal = Journal::default();
        let source = Arc::new(FakeSource::new(&journal, rows));
        build(journal, source, clear_mode)
    }

    fn build(journal: Journal, source: Arc<FakeSource>, clear_mode: ClearMode) -> Harness {
        let fetcher = Arc::new(FakeFetcher::new(&journal));
        let sink = FakeSink::new(&journal);
        let pipeline = IngestionPipeline::new(
            source.clone(),
            fetcher.clone(),
            Arc::new(sink.clone()),
            clear_mode,
        );
        Harness {
            journal,
            source,
            fetcher,
            sink,
            pipeline,
        }
    }

    fn two_valid_one_blank() -> Batch {
        vec![
            row("ana@example.com", "https://f.example/a.pdf", "https://f.example/a-letter.pdf"),
            row("", "https://f.example/x.pdf", ""),
            row("bo@example.com", "https://f.example/b.pdf", ""),
        ]
    }

    #[tokio::test]
    async fn test_empty_batch_opens_no_transaction() {
        let h = harness(vec![], ClearMode::AfterCommit);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert_eq!(report, CycleReport::empty());
        assert_eq!(h.journal.entries(), vec!["fetch_rows"]);
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(report.is_committed());
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);

        let emails: Vec<_> = h.sink.committed().into_iter().map(|r| r.email).collect();
        assert_eq!(emails, vec!["ana@example.com", "bo@example.com"]);
        assert_eq!(h.journal.count("fetch https://f.example/x.pdf"), 0);
    }

    #[tokio::test]
    async fn test_non_text_email_is_skipped() {
        let mut numeric = row("x", "", "").0;
        numeric[0] = Value::from(12345);
        let h = harness(
            vec![SubmissionRow(numeric), row("ana@example.com", "", "")],
            ClearMode::AfterCommit,
        );

        let report = h.pipeline.run_cycle().await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_attachments_are_stored_as_bytes() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);

        h.pipeline.run_cycle().await.unwrap();

        let committed = h.sink.committed();
        assert_eq!(
            committed[0].download.as_ref().map(AttachmentBlob::as_bytes),
            Some(b"https://f.example/a.pdf".as_slice())
        );
        assert!(committed[0].authorization_letter.is_some());
        assert!(committed[1].authorization_letter.is_none());
    }

    #[tokio::test]
    async fn test_clear_happens_once_after_commit() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(report.cleared);
        let entries = h.journal.entries();
        let commit = entries.iter().position(|e| e == "commit").unwrap();
        let clear = entries.iter().position(|e| e == "clear Responses 3").unwrap();
        assert!(commit < clear);
        assert_eq!(h.journal.count("clear"), 1);
        assert_eq!(h.source.remaining(), 0);
    }

    #[tokio::test]
    async fn test_per_row_mode_clears_inside_transaction() {
        let h = harness(two_valid_one_blank(), ClearMode::PerRow);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(report.cleared);
        assert_eq!(h.journal.count("clear"), 2);
        let entries = h.journal.entries();
        let commit = entries.iter().position(|e| e == "commit").unwrap();
        let first_clear = entries.iter().position(|e| e.starts_with("clear")).unwrap();
        assert!(first_clear < commit);
    }

    #[tokio::test]
    async fn test_per_row_mode_loses_cleared_rows_on_rollback() {
        let h = harness(
            vec![
                row("ana@example.com", "https://f.example/a.pdf", ""),
                row("bo@example.com", "https://f.example/b.pdf", ""),
            ],
            ClearMode::PerRow,
        );
        h.fetcher.fail("https://f.example/b.pdf", usize::MAX);

        let report = h.pipeline.run_cycle().await.unwrap();

        // The clear after row 1 already emptied the source when row 2 failed
        assert!(matches!(report.outcome, CycleOutcome::RolledBack { ref error } if error.contains("b.pdf")));
        assert!(report.cleared);
        assert!(h.sink.committed().is_empty());
        assert_eq!(h.source.remaining(), 0);
        assert_eq!(
            h.journal.entries(),
            vec![
                "fetch_rows",
                "begin",
                "fetch https://f.example/a.pdf",
                "insert ana@example.com",
                "clear Responses 2",
                "fetch https://f.example/b.pdf",
                "rollback",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_download_rolls_back_and_keeps_rows() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.fetcher.fail("https://f.example/b.pdf", usize::MAX);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(matches!(report.outcome, CycleOutcome::RolledBack { ref error } if error.contains("b.pdf")));
        assert_eq!(report.inserted, 0);
        assert!(!report.cleared);
        assert!(h.sink.committed().is_empty());
        assert_eq!(h.journal.count("rollback"), 1);
        assert_eq!(h.journal.count("commit"), 0);
        assert_eq!(h.journal.count("clear"), 0);
        assert_eq!(h.source.remaining(), 3);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_whole_batch() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.sink.fail_insert_for("bo@example.com");

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(!report.is_committed());
        assert!(h.sink.committed().is_empty());
        assert_eq!(h.journal.count("insert"), 2);
        assert_eq!(h.journal.count("rollback"), 1);
    }

    #[tokio::test]
    async fn test_repoll_after_rollback_commits_same_records() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.fetcher.fail("https://f.example/a-letter.pdf", 1);

        let first = h.pipeline.run_cycle().await.unwrap();
        assert!(!first.is_committed());

        let second = h.pipeline.run_cycle().await.unwrap();
        assert!(second.is_committed());

        let expected: Vec<StoredRecord> = two_valid_one_blank()
            .iter()
            .filter_map(|r| r.validate().ok())
            .map(|s| {
                let download = s
                    .download_url
                    .as_ref()
                    .map(|u| AttachmentBlob::from(u.as_bytes().to_vec()));
                let letter = s
                    .authorization_letter_url
                    .as_ref()
                    .map(|u| AttachmentBlob::from(u.as_bytes().to_vec()));
                StoredRecord::from_submission(s, download, letter)
            })
            .collect();
        assert_eq!(h.sink.committed(), expected);

        // The cleared sheet yields nothing more
        let third = h.pipeline.run_cycle().await.unwrap();
        assert_eq!(third.outcome, CycleOutcome::Empty);
        assert_eq!(h.sink.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_failure_does_not_affect_commit() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.source.fail_clear(true);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(report.is_committed());
        assert!(!report.cleared);
        assert_eq!(h.sink.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_all_rows_invalid_commits_without_clearing() {
        let h = harness(vec![row("", "", ""), row("  ", "", "")], ClearMode::AfterCommit);

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(report.is_committed());
        assert_eq!(report.skipped, 2);
        assert_eq!(h.journal.count("clear"), 0);
    }

    #[tokio::test]
    async fn test_source_failure_is_an_error() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.source.fail_fetch(true);

        let err = h.pipeline.run_cycle().await.unwrap_err();

        assert!(matches!(err, IngestError::SourceUnavailable(_)));
        assert_eq!(h.journal.count("begin"), 0);
    }

    #[tokio::test]
    async fn test_sink_unavailable_is_an_error() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.sink.fail_begin();

        let err = h.pipeline.run_cycle().await.unwrap_err();

        assert!(matches!(err, IngestError::SinkUnavailable(_)));
        assert_eq!(h.journal.count("fetch https"), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_as_rollback() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);
        h.sink.fail_commit();

        let report = h.pipeline.run_cycle().await.unwrap();

        assert!(!report.is_committed());
        assert_eq!(h.journal.count("clear"), 0);
    }

    #[tokio::test]
    async fn test_manual_trigger_rejected_while_cycle_runs() {
        let journal = Journal::default();
        let (source, entered, release) = FakeSource::gated(&journal, two_valid_one_blank());
        let h = build(journal, Arc::new(source), ClearMode::AfterCommit);
        let pipeline = Arc::new(h.pipeline);

        let running = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run_cycle().await }
        });
        entered.notified().await;

        assert!(pipeline.is_running());
        let err = pipeline.try_run_cycle().await.unwrap_err();
        assert!(matches!(err, IngestError::CycleInProgress));

        release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert!(report.is_committed());
        assert_eq!(h.journal.count("begin"), 1);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_try_run_cycle_runs_when_idle() {
        let h = harness(two_valid_one_blank(), ClearMode::AfterCommit);

        let report = h.pipeline.try_run_cycle().await.unwrap();

        assert_eq!(report.inserted, 2);
    }
}

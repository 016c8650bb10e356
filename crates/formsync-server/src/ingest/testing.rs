//! In-memory source, fetcher and sink for pipeline and scheduler tests
//!
//! All three write to a shared [`Journal`] so tests can assert on the order
//! of remote and store operations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::fetcher::AttachmentFetcher;
use super::models::{AttachmentBlob, Batch, RecordId, StoredRecord, SubmissionRow};
use super::sink::{RecordSink, SinkTransaction};
use super::source::{RecordSource, SourceError};
use super::{IngestError, Result};

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// A row with every field filled in
pub fn row(email: &str, download_url: &str, letter_url: &str) -> SubmissionRow {
    SubmissionRow::new([
        email,
        "Practice",
        "Title",
        "Subject",
        "Description",
        download_url,
        "public",
        "students",
        "Ana",
        "López",
        "Ruiz",
        "Mexican",
        "UNAM",
        letter_url,
    ])
}

/// Holds a fetch until the test releases it
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// A sheet whose rows persist until cleared
pub struct FakeSource {
    journal: Journal,
    rows: Mutex<Batch>,
    fail_fetch: AtomicBool,
    fail_clear: AtomicBool,
    gate: Option<Gate>,
}

impl FakeSource {
    pub fn new(journal: &Journal, rows: Batch) -> Self {
        Self {
            journal: journal.clone(),
            rows: Mutex::new(rows),
            fail_fetch: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
            gate: None,
        }
    }

    /// Each fetch notifies `entered`, then waits for `release`
    pub fn gated(journal: &Journal, rows: Batch) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut source = Self::new(journal, rows);
        source.gate = Some(Gate {
            entered: entered.clone(),
            release: release.clone(),
        });
        (source, entered, release)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch_rows(&self) -> Result<Batch> {
        self.journal.record("fetch_rows");
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(IngestError::SourceUnavailable(SourceError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }));
        }
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn clear_rows(&self, sheet: &str, row_count: usize) -> Result<()> {
        self.journal.record(format!("clear {} {}", sheet, row_count));
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(IngestError::ClearFailed(SourceError::Status {
                status: 403,
                body: "forbidden".to_string(),
            }));
        }
        let mut rows = self.rows.lock().unwrap();
        let n = row_count.min(rows.len());
        rows.drain(..n);
        Ok(())
    }

    fn sheet_name(&self) -> &str {
        "Responses"
    }
}

/// Serves every URL as its own bytes, unless told to fail it
#[derive(Default)]
pub struct FakeFetcher {
    journal: Journal,
    failures: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            failures: Mutex::default(),
        }
    }

    /// Fail the next `times` fetches of `url`
    pub fn fail(&self, url: &str, times: usize) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }
}

#[async_trait]
impl AttachmentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<AttachmentBlob> {
        self.journal.record(format!("fetch {}", url));
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(IngestError::download(url, "HTTP error: 500"));
            }
        }
        Ok(AttachmentBlob::from(url.as_bytes().to_vec()))
    }
}

#[derive(Default)]
struct Store {
    committed: Vec<(RecordId, StoredRecord)>,
    next_id: i64,
    fail_begin: bool,
    fail_insert_for: Option<String>,
    fail_commit: bool,
}

/// Store that keeps committed records in memory
#[derive(Clone, Default)]
pub struct FakeSink {
    journal: Journal,
    store: Arc<Mutex<Store>>,
}

impl FakeSink {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            store: Arc::default(),
        }
    }

    pub fn committed(&self) -> Vec<StoredRecord> {
        self.store
            .lock()
            .unwrap()
            .committed
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn fail_begin(&self) {
        self.store.lock().unwrap().fail_begin = true;
    }

    pub fn fail_insert_for(&self, email: &str) {
        self.store.lock().unwrap().fail_insert_for = Some(email.to_string());
    }

    pub fn fail_commit(&self) {
        self.store.lock().unwrap().fail_commit = true;
    }
}

#[async_trait]
impl RecordSink for FakeSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        self.journal.record("begin");
        if self.store.lock().unwrap().fail_begin {
            return Err(IngestError::SinkUnavailable(sqlx::Error::PoolClosed));
        }
        Ok(Box::new(FakeTransaction {
            sink: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct FakeTransaction {
    sink: FakeSink,
    pending: Vec<StoredRecord>,
}

#[async_trait]
impl SinkTransaction for FakeTransaction {
    async fn insert_record(&mut self, record: &StoredRecord) -> Result<RecordId> {
        self.sink.journal.record(format!("insert {}", record.email));
        let mut store = self.sink.store.lock().unwrap();
        if store.fail_insert_for.as_deref() == Some(record.email.as_str()) {
            return Err(IngestError::InsertFailed(sqlx::Error::Protocol(
                "value too long for type".to_string(),
            )));
        }
        store.next_id += 1;
        self.pending.push(record.clone());
        Ok(RecordId(store.next_id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.sink.journal.record("commit");
        let mut store = self.sink.store.lock().unwrap();
        if store.fail_commit {
            return Err(IngestError::SinkUnavailable(sqlx::Error::PoolClosed));
        }
        let first_id = store.next_id - self.pending.len() as i64 + 1;
        for (offset, record) in self.pending.into_iter().enumerate() {
            store.committed.push((RecordId(first_id + offset as i64), record));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.sink.journal.record("rollback");
        Ok(())
    }
}

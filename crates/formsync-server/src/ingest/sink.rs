//! Record sink: the relational store submissions are committed to
//!
//! A batch is written through one [`SinkTransaction`]. The PostgreSQL sink
//! hands out at most one open transaction at a time; a second `begin` waits
//! until the first transaction commits, rolls back or is dropped.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::models::{AttachmentBlob, RecordId, StoredRecord};
use super::{IngestError, Result};

const INSERT_SUBMISSION: &str = r#"
    INSERT INTO submissions (
        email, content_type, title, subject, description, download,
        privacy, audience, first_name, paternal_surname, maternal_surname,
        nationality, institution, authorization_letter
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
    RETURNING id
"#;

/// Opens batch transactions
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Start a batch; fails with [`IngestError::SinkUnavailable`]
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>>;
}

/// One open batch
///
/// Dropping a transaction without committing discards its inserts.
#[async_trait]
pub trait SinkTransaction: Send {
    /// Insert one record; fails with [`IngestError::InsertFailed`]
    async fn insert_record(&mut self, record: &StoredRecord) -> Result<RecordId>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// [`RecordSink`] writing to the `submissions` table
#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
    lock: Arc<Mutex<()>>,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl RecordSink for PgSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let guard = self.lock.clone().lock_owned().await;
        let tx = self.pool.begin().await.map_err(IngestError::SinkUnavailable)?;
        debug!("Opened submission batch transaction");

        Ok(Box::new(PgSinkTransaction { tx, _guard: guard }))
    }
}

struct PgSinkTransaction {
    tx: Transaction<'static, Postgres>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl SinkTransaction for PgSinkTransaction {
    async fn insert_record(&mut self, record: &StoredRecord) -> Result<RecordId> {
        let id: i64 = sqlx::query_scalar(INSERT_SUBMISSION)
            .bind(&record.email)
            .bind(record.content_type.as_deref())
            .bind(record.title.as_deref())
            .bind(record.subject.as_deref())
            .bind(record.description.as_deref())
            .bind(record.download.as_ref().map(AttachmentBlob::as_bytes))
            .bind(record.privacy.as_deref())
            .bind(record.audience.as_deref())
            .bind(record.first_name.as_deref())
            .bind(record.paternal_surname.as_deref())
            .bind(record.maternal_surname.as_deref())
            .bind(record.nationality.as_deref())
            .bind(record.institution.as_deref())
            .bind(record.authorization_letter.as_ref().map(AttachmentBlob::as_bytes))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(IngestError::InsertFailed)?;

        Ok(RecordId(id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(IngestError::SinkUnavailable)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(IngestError::SinkUnavailable)
    }
}

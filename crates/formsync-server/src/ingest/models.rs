//! Ingestion data model
//!
//! Raw rows arrive as positional cell arrays from the spreadsheet. They are
//! validated and turned into a named [`Submission`] immediately, so nothing
//! downstream indexes cells by position.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of cells a submission row carries
pub const SUBMISSION_COLUMNS: usize = 14;

mod column {
    pub const EMAIL: usize = 0;
    pub const CONTENT_TYPE: usize = 1;
    pub const TITLE: usize = 2;
    pub const SUBJECT: usize = 3;
    pub const DESCRIPTION: usize = 4;
    pub const DOWNLOAD_URL: usize = 5;
    pub const PRIVACY: usize = 6;
    pub const AUDIENCE: usize = 7;
    pub const FIRST_NAME: usize = 8;
    pub const PATERNAL_SURNAME: usize = 9;
    pub const MATERNAL_SURNAME: usize = 10;
    pub const NATIONALITY: usize = 11;
    pub const INSTITUTION: usize = 12;
    pub const AUTHORIZATION_LETTER_URL: usize = 13;
}

/// One raw row as returned by the source
///
/// Trailing empty cells may be missing entirely.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionRow(pub Vec<Value>);

/// Rows returned by one poll, in source order
pub type Batch = Vec<SubmissionRow>;

/// Why a row was not turned into a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRejection {
    MissingEmail,
    EmailNotText,
    BlankEmail,
}

impl std::fmt::Display for RowRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowRejection::MissingEmail => write!(f, "email cell is missing"),
            RowRejection::EmailNotText => write!(f, "email cell is not text"),
            RowRejection::BlankEmail => write!(f, "email cell is blank"),
        }
    }
}

impl SubmissionRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        Self(cells.into_iter().map(Into::into).collect())
    }

    fn cell(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Textual form of a scalar cell; `None` for missing or null cells
    fn text(&self, index: usize) -> Option<String> {
        match self.cell(index)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// A URL cell, `None` when missing or blank
    fn url(&self, index: usize) -> Option<String> {
        match self.cell(index)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Validate the row and name its fields
    pub fn validate(&self) -> Result<Submission, RowRejection> {
        let email = match self.cell(column::EMAIL) {
            None | Some(Value::Null) => return Err(RowRejection::MissingEmail),
            Some(Value::String(s)) if s.trim().is_empty() => return Err(RowRejection::BlankEmail),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(RowRejection::EmailNotText),
        };

        Ok(Submission {
            email,
            content_type: self.text(column::CONTENT_TYPE),
            title: self.text(column::TITLE),
            subject: self.text(column::SUBJECT),
            description: self.text(column::DESCRIPTION),
            download_url: self.url(column::DOWNLOAD_URL),
            privacy: self.text(column::PRIVACY),
            audience: self.text(column::AUDIENCE),
            first_name: self.text(column::FIRST_NAME),
            paternal_surname: self.text(column::PATERNAL_SURNAME),
            maternal_surname: self.text(column::MATERNAL_SURNAME),
            nationality: self.text(column::NATIONALITY),
            institution: self.text(column::INSTITUTION),
            authorization_letter_url: self.url(column::AUTHORIZATION_LETTER_URL),
        })
    }
}

/// A validated submission with named fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub email: String,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub download_url: Option<String>,
    pub privacy: Option<String>,
    pub audience: Option<String>,
    pub first_name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub nationality: Option<String>,
    pub institution: Option<String>,
    pub authorization_letter_url: Option<String>,
}

/// Bytes downloaded for one attachment
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AttachmentBlob(Vec<u8>);

impl AttachmentBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for AttachmentBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for AttachmentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AttachmentBlob({} bytes)", self.0.len())
    }
}

/// The row committed to the store: scalar fields plus resolved attachments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub email: String,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub download: Option<AttachmentBlob>,
    pub privacy: Option<String>,
    pub audience: Option<String>,
    pub first_name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub nationality: Option<String>,
    pub institution: Option<String>,
    pub authorization_letter: Option<AttachmentBlob>,
}

impl StoredRecord {
    /// Replace the submission's URLs with their downloaded content
    pub fn from_submission(
        submission: Submission,
        download: Option<AttachmentBlob>,
        authorization_letter: Option<AttachmentBlob>,
    ) -> Self {
        Self {
            email: submission.email,
            content_type: submission.content_type,
            title: submission.title,
            subject: submission.subject,
            description: submission.description,
            download,
            privacy: submission.privacy,
            audience: submission.audience,
            first_name: submission.first_name,
            paternal_surname: submission.paternal_surname,
            maternal_surname: submission.maternal_surname,
            nationality: submission.nationality,
            institution: submission.institution,
            authorization_letter,
        }
    }
}

/// Store-generated identifier of a committed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How one poll cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The source had no rows; no transaction was opened
    Empty,
    Committed,
    RolledBack { error: String },
}

/// Summary of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub rows_read: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// Whether the source range was cleared during this cycle
    pub cleared: bool,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn empty() -> Self {
        Self {
            rows_read: 0,
            inserted: 0,
            skipped: 0,
            cleared: false,
            outcome: CycleOutcome::Empty,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == CycleOutcome::Committed
    }
}

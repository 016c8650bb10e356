//! Read-side queries over the `submissions` table

pub mod get_download;
pub mod list_submissions;

pub use list_submissions::{ListSubmissionsQuery, ListSubmissionsResponse, SubmissionSummary};

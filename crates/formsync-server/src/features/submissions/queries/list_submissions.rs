//! List submissions query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Query to list stored submissions, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSubmissionsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl ListSubmissionsQuery {
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(limit) = self.limit {
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err("limit must be between 1 and 100");
            }
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err("offset must not be negative");
            }
        }
        Ok(())
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Public fields of one submission; the email address is never listed
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionSummary {
    pub id: i64,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub first_name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub has_download: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSubmissionsResponse {
    pub submissions: Vec<SubmissionSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn handle(
    pool: &PgPool,
    query: &ListSubmissionsQuery,
) -> Result<ListSubmissionsResponse, sqlx::Error> {
    let limit = query.limit();
    let offset = query.offset();

    let submissions = sqlx::query_as::<_, SubmissionSummary>(
        r#"
        SELECT id, title, subject, description, first_name,
               paternal_surname, maternal_surname,
               (download IS NOT NULL) AS has_download, created_at
        FROM submissions
        ORDER BY id
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
        .fetch_one(pool)
        .await?;

    Ok(ListSubmissionsResponse {
        submissions,
        total,
        limit,
        offset,
    })
}

//! Fetch the main document of one submission

use sqlx::PgPool;

/// The stored download, or `None` when the submission does not exist or has
/// no document
pub async fn handle(pool: &PgPool, id: i64) -> Result<Option<Vec<u8>>, sqlx::Error> {
    let download: Option<Option<Vec<u8>>> =
        sqlx::query_scalar("SELECT download FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(download.flatten())
}

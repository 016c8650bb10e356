//! Submission routes
//!
//! Public read-only routes over committed submissions.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use super::queries::{get_download, list_submissions, ListSubmissionsQuery, ListSubmissionsResponse};
use crate::error::{AppError, AppResult};

/// Create submission routes
pub fn submissions_routes() -> Router<PgPool> {
    Router::new()
        .route("/submissions", get(list))
        .route("/submissions/:id/download", get(download))
}

/// List submissions
///
/// GET /submissions?limit=20&offset=0
async fn list(
    State(db): State<PgPool>,
    Query(query): Query<ListSubmissionsQuery>,
) -> AppResult<Json<ListSubmissionsResponse>> {
    query
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    Ok(Json(list_submissions::handle(&db, &query).await?))
}

/// Download a submission's document
///
/// GET /submissions/:id/download
async fn download(State(db): State<PgPool>, Path(id): Path<i64>) -> AppResult<Response> {
    let bytes = get_download::handle(&db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Submission {} has no download", id)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"submission-{}.pdf\"", id),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/formsync_test")
            .unwrap();
        submissions_routes().with_state(pool)
    }

    #[tokio::test]
    async fn test_invalid_limit_is_bad_request() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/submissions?limit=1000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/submissions/abc/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

//! Ingestion routes
//!
//! `POST /ingest/run` runs one cycle and returns its report. `GET` is
//! accepted on the same path for older callers.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::ingest::{CycleReport, IngestionPipeline};

/// Create ingestion routes
pub fn ingest_routes() -> Router<Arc<IngestionPipeline>> {
    Router::new()
        .route("/ingest/run", get(run_cycle).post(run_cycle))
        .route("/ingest/status", get(status))
}

/// Routes answering 503 when no pipeline is configured
pub fn disabled_ingest_routes() -> Router {
    Router::new()
        .route("/ingest/run", get(disabled).post(disabled))
        .route("/ingest/status", get(disabled))
}

/// Run one ingestion cycle
///
/// POST /ingest/run
///
/// Responds 409 while another cycle is running. A rolled-back batch is still
/// a 200; the report carries the failure.
async fn run_cycle(State(pipeline): State<Arc<IngestionPipeline>>) -> AppResult<Json<CycleReport>> {
    // Detached so a dropped request cannot abandon an open batch
    let report = tokio::spawn(async move { pipeline.try_run_cycle().await })
        .await
        .map_err(|e| AppError::Internal(format!("ingestion task failed: {}", e)))??;

    Ok(Json(report))
}

/// GET /ingest/status
async fn status(State(pipeline): State<Arc<IngestionPipeline>>) -> Json<Value> {
    Json(json!({ "enabled": true, "running": pipeline.is_running() }))
}

async fn disabled() -> AppError {
    AppError::Unavailable("Ingestion is disabled (INGEST_ENABLED=false)".to_string())
}

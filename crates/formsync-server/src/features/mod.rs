//! HTTP feature slices
//!
//! - **ingest**: manual trigger and status of the ingestion cycle
//! - **submissions**: read access to stored submissions and their documents
//!
//! Each slice owns its routes and queries and is mounted under `/api/v1`.

pub mod ingest;
pub mod submissions;

use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::ingest::IngestionPipeline;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub db: PgPool,
    /// Absent when ingestion is disabled
    pub pipeline: Option<Arc<IngestionPipeline>>,
}

/// Creates the API router with all feature routes mounted
pub fn router(state: FeatureState) -> Router<()> {
    let ingest = match state.pipeline {
        Some(pipeline) => ingest::ingest_routes().with_state(pipeline),
        None => ingest::disabled_ingest_routes(),
    };

    Router::new()
        .merge(ingest)
        .merge(submissions::submissions_routes().with_state(state.db))
}

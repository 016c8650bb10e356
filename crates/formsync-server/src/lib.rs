//! formsync server library
//!
//! Moves form submissions from a response spreadsheet into PostgreSQL.
//!
//! # Overview
//!
//! - **Ingestion**: a background poller reads pending spreadsheet rows,
//!   downloads the documents each row links to, commits the whole batch in
//!   one transaction and clears the consumed rows
//! - **API**: a manual trigger for the ingestion cycle plus read access to
//!   stored submissions
//! - **Configuration**: environment variables, with `.env` support
//!
//! # Example
//!
//! ```no_run
//! use formsync_server::{app, config::Config, db, features::FeatureState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let router = app::create_router(FeatureState { db: pool, pipeline: None }, &config.cors);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

pub use error::{AppError, AppResult};

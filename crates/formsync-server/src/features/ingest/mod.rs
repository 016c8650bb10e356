//! Ingestion trigger feature

mod routes;


pub use routes::{disabled_ingest_routes, ingest_routes};

//! Stored submissions: listing and document download

pub mod queries;
mod routes;

pub use routes::submissions_routes;

//! Error types shared across formsync crates

use thiserror::Error;

/// Result type alias for formsync operations
pub type Result<T> = std::result::Result<T, FormsyncError>;

/// Errors raised while assembling configuration shared across components
#[derive(Error, Debug)]
pub enum FormsyncError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FormsyncError {
    /// Build a configuration error naming the offending variable
    pub fn missing_env(name: &str) -> Self {
        Self::Config(format!("{} must be set", name))
    }
}

//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid construction parameters or configuration file contents
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admission requested for a key that has no record
    #[error("No rate limit record for key '{key}'")]
    NotFound {
        /// The key that was looked up
        key: String,
    },

    /// No async runtime available to schedule background work
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

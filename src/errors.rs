//! Error types for quakesph.
//!
//! Uses `thiserror` for library-style error definitions.

use thiserror::Error;

/// Errors that can occur in quakesph operations.
#[derive(Error, Debug)]
pub enum QuakeError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Feed endpoint returned an error status
    #[error("feed API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid response structure
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Value failed validation (CLI input, config)
    #[error("Invalid value: {0}")]
    Validation(String),

    /// Geolocation denied or failed
    #[error("location unavailable: {0}")]
    Location(String),

    /// Reading a local file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

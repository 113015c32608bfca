//! Error types for the Floodgate engine.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// A rejected admission is not an error: it is reported through
/// [`Decision`](crate::admission::Decision). Only misconfiguration and
/// malformed input surface here.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid engine parameters or an unparsable configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request, such as an empty entity id
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

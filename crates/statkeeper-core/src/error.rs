//! Error types and result aliases shared by statkeeper crates.
//!
//! Errors are structured for programmatic handling and carry enough context
//! to be logged without further decoration.

/// The result type used throughout statkeeper.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

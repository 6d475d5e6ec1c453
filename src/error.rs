//! Error Types and Handling
//!
//! Error types for OrionDB operations. Most read-path misses (`get` or
//! `remove` on an absent id) are reported through the return value rather
//! than an error; the variants here cover the failures that carry a cause.
//!
//! # Example
//!
//! ```
//! use oriondb::{OrionError, Result};
//!
//! fn check_dimensions(expected: usize, got: usize) -> Result<()> {
//!     if expected != got {
//!         return Err(OrionError::DimensionMismatch { expected, got });
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Error types for OrionDB operations
#[must_use]
#[derive(Error, Debug)]
pub enum OrionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Index rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("Database corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidDatabase(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

impl OrionError {
    /// Whether this error indicates an unreadable or damaged artifact,
    /// as opposed to a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            OrionError::Corruption(_) | OrionError::InvalidDatabase(_)
        )
    }
}

/// Result type alias for OrionDB operations
pub type Result<T> = std::result::Result<T, OrionError>;

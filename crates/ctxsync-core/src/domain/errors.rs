//! Domain error types
//!
//! Validation failures raised while constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not inside the workspace root
    #[error("Path not within workspace: {0}")]
    PathNotInWorkspace(String),

    /// Invalid content hash (expected 64 lowercase hex characters)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

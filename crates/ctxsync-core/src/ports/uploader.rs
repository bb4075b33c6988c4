//! Upload port (driven/secondary port)
//!
//! Delivers a batch of changed files to the remote context service.
//!
//! ## Design Notes
//!
//! - Failures are typed as [`UploadError::Transient`] or
//!   [`UploadError::Permanent`]; the coordinator retries only the former.
//! - Adapters that can only surface a message string use
//!   [`UploadError::from_message`] to classify it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Language;

/// One file in an upload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub path: PathBuf,
    pub content: String,
    pub language: Language,
}

/// Why an upload failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Worth retrying: network trouble, timeouts, throttling, server errors
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// Retrying will not help: rejected credentials, invalid session, bad payload
    #[error("permanent upload failure: {0}")]
    Permanent(String),
}

impl UploadError {
    /// Classify a bare error message
    ///
    /// Messages mentioning network, connection, timeout, throttling or
    /// server trouble are transient; everything else is permanent.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        let transient = lower.contains("network")
            || lower.contains("connection")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("dns")
            || lower.contains("reset by peer")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
            || lower.contains("server")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504");

        if transient {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Remote context service
#[async_trait::async_trait]
pub trait IUploader: Send + Sync {
    /// Upload a batch of files for `session_id`
    ///
    /// # Arguments
    /// * `session_id` - Conversation/session the files belong to
    /// * `auth_token` - Bearer token, when the service requires one
    /// * `files` - Files with their current content and language
    async fn upload(
        &self,
        session_id: &str,
        auth_token: Option<&str>,
        files: &[UploadFile],
    ) -> Result<(), UploadError>;
}

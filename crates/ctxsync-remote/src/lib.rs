//! ctxsync Remote - HTTP client for the context service
//!
//! ## Modules
//!
//! - [`client`] - [`HttpUploader`], the `IUploader` adapter over `reqwest`

pub mod client;

use thiserror::Error;

use ctxsync_core::ports::UploadError;

pub use client::HttpUploader;

/// Errors returned by the context service client
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials missing, invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unknown session
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request took longer than the configured timeout (408)
    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// A server-side error occurred (5xx)
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Any other non-success status
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service answered `success: false`
    #[error("Upload refused: {0}")]
    Refused(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The base URL cannot carry a path
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The response body could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Map a non-success HTTP status and its body text
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            408 => Self::RequestTimeout(message),
            429 => Self::TooManyRequests(message),
            s @ 500..=599 => Self::ServerError { status: s, message },
            s => Self::Rejected { status: s, message },
        }
    }

    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestTimeout(_) | Self::TooManyRequests(_) | Self::ServerError { .. } => true,
            Self::NetworkError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Refused(message) => UploadError::from_message(message.as_str()).is_transient(),
            _ => false,
        }
    }
}

impl From<RemoteError> for UploadError {
    fn from(err: RemoteError) -> Self {
        if err.is_transient() {
            UploadError::Transient(err.to_string())
        } else {
            UploadError::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::UNAUTHORIZED, false),
            (StatusCode::FORBIDDEN, false),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::PAYLOAD_TOO_LARGE, false),
            (StatusCode::REQUEST_TIMEOUT, true),
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::SERVICE_UNAVAILABLE, true),
        ];
        for (status, transient) in cases {
            let err = RemoteError::from_status(status, "body".into());
            assert_eq!(err.is_transient(), transient, "{status}");
        }
    }

    #[test]
    fn test_refused_uses_message_heuristic() {
        assert!(RemoteError::Refused("Server overloaded".into()).is_transient());
        assert!(!RemoteError::Refused("Invalid session".into()).is_transient());
    }

    #[test]
    fn test_into_upload_error() {
        let err: UploadError = RemoteError::from_status(StatusCode::BAD_GATEWAY, "down".into()).into();
        assert_eq!(err, UploadError::Transient("Server error (502): down".into()));

        let err: UploadError = RemoteError::Unauthorized("expired".into()).into();
        assert_eq!(err, UploadError::Permanent("Unauthorized: expired".into()));
    }
}

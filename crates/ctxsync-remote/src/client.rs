//! Context service client
//!
//! Uploads a batch of changed files to a session:
//!
//! ```text
//! POST {base_url}/sessions/{session_id}/files
//! Authorization: Bearer <token>
//!
//! { "files": [ { "path": "...", "content": "...", "language": "typescript" } ] }
//! ```
//!
//! The service answers `{ "success": bool, "error": "..." }`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ctxsync_remote::HttpUploader;
//!
//! # async fn example() -> Result<(), ctxsync_remote::RemoteError> {
//! let uploader = HttpUploader::with_base_url("http://localhost:8080/api");
//! uploader.upload_files("session-1", Some("token"), &[]).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use ctxsync_core::config::RemoteConfig;
use ctxsync_core::ports::{IUploader, UploadError, UploadFile};

use crate::RemoteError;

const USER_AGENT: &str = concat!("ctxsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    files: &'a [UploadFile],
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// [`IUploader`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    base_url: String,
}

impl HttpUploader {
    /// Creates an uploader with a default `reqwest` client
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Creates an uploader from the `remote` config section
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.endpoint.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/sessions/{session_id}/files`, with the id percent-encoded
    fn files_url(&self, session_id: &str) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidEndpoint(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["sessions", session_id, "files"]);
        Ok(url)
    }

    /// Uploads `files` to the session
    ///
    /// # Errors
    /// Returns a [`RemoteError`] for network failures, non-success statuses,
    /// unparseable responses and `success: false` answers
    #[instrument(skip(self, auth_token, files), fields(files = files.len()))]
    pub async fn upload_files(
        &self,
        session_id: &str,
        auth_token: Option<&str>,
        files: &[UploadFile],
    ) -> Result<(), RemoteError> {
        let url = self.files_url(session_id)?;
        debug!(url = %url, "Uploading files");

        let mut request = self.client.post(url).json(&UploadRequest { files });
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Upload rejected");
            return Err(RemoteError::from_status(status, body));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        if !body.success {
            let message = body.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(RemoteError::Refused(message));
        }

        debug!("Upload accepted");
        Ok(())
    }
}

#[async_trait]
impl IUploader for HttpUploader {
    async fn upload(
        &self,
        session_id: &str,
        auth_token: Option<&str>,
        files: &[UploadFile],
    ) -> Result<(), UploadError> {
        self.upload_files(session_id, auth_token, files)
            .await
            .map_err(UploadError::from)
    }
}

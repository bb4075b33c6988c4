//! Shared helpers for the context service mocks

use std::path::PathBuf;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ctxsync_core::domain::Language;
use ctxsync_core::ports::UploadFile;
use ctxsync_remote::HttpUploader;

pub const SESSION: &str = "session-42";
pub const FILES_PATH: &str = "/api/sessions/session-42/files";

/// Starts a mock server and an uploader pointed at its `/api` base
pub async fn setup() -> (MockServer, HttpUploader) {
    let server = MockServer::start().await;
    let uploader = HttpUploader::with_base_url(format!("{}/api", server.uri()));
    (server, uploader)
}

/// Answers every upload with `status` and the given JSON body
pub async fn mount_upload_response(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

pub fn sample_files() -> Vec<UploadFile> {
    vec![
        UploadFile {
            path: PathBuf::from("/ws/src/main.ts"),
            content: "import { a } from './a';\n".to_string(),
            language: Language::TypeScript,
        },
        UploadFile {
            path: PathBuf::from("/ws/src/a.ts"),
            content: "export const a = 1;\n".to_string(),
            language: Language::TypeScript,
        },
    ]
}

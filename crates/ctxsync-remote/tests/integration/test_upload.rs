//! Upload endpoint behavior and error classification

use std::time::Duration;

use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use ctxsync_core::config::RemoteConfig;
use ctxsync_core::ports::{IUploader, UploadError};
use ctxsync_remote::{HttpUploader, RemoteError};

use crate::common::{self, FILES_PATH, SESSION};

#[tokio::test]
async fn test_upload_sends_files_with_bearer_token() {
    let (server, uploader) = common::setup().await;

    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(serde_json::json!({
            "files": [
                {
                    "path": "/ws/src/main.ts",
                    "content": "import { a } from './a';\n",
                    "language": "typescript"
                },
                {
                    "path": "/ws/src/a.ts",
                    "content": "export const a = 1;\n",
                    "language": "typescript"
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    uploader
        .upload(SESSION, Some("secret-token"), &common::sample_files())
        .await
        .expect("upload failed");
}

#[tokio::test]
async fn test_upload_without_token_sends_no_authorization() {
    let (server, uploader) = common::setup().await;
    common::mount_upload_response(&server, 200, serde_json::json!({ "success": true })).await;

    uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .expect("upload failed");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_success_false_is_classified_by_message() {
    let (server, uploader) = common::setup().await;
    common::mount_upload_response(
        &server,
        200,
        serde_json::json!({ "success": false, "error": "Invalid session" }),
    )
    .await;

    let err = uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .unwrap_err();
    assert_eq!(err, UploadError::Permanent("Upload refused: Invalid session".into()));
}

#[tokio::test]
async fn test_success_false_with_server_message_is_transient() {
    let (server, uploader) = common::setup().await;
    common::mount_upload_response(
        &server,
        200,
        serde_json::json!({ "success": false, "error": "Server busy, try again" }),
    )
    .await;

    let err = uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_status_codes_map_to_transient_or_permanent() {
    let cases = [
        (500, true),
        (503, true),
        (429, true),
        (408, true),
        (400, false),
        (401, false),
        (404, false),
    ];

    for (status, transient) in cases {
        let (server, uploader) = common::setup().await;
        common::mount_upload_response(&server, status, serde_json::json!({ "error": "x" })).await;

        let err = uploader
            .upload(SESSION, None, &common::sample_files())
            .await
            .unwrap_err();
        assert_eq!(err.is_transient(), transient, "status {status}");
    }
}

#[tokio::test]
async fn test_unauthorized_surfaces_typed_error() {
    let (server, uploader) = common::setup().await;
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let err = uploader
        .upload_files(SESSION, Some("old"), &common::sample_files())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Unauthorized(ref body) if body == "token expired"));
}

#[tokio::test]
async fn test_malformed_response_is_permanent() {
    let (server, uploader) = common::setup().await;
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let err = uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let (server, _) = common::setup().await;
    let base = format!("{}/api", server.uri());
    drop(server);

    let uploader = HttpUploader::with_base_url(base);
    let err = uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let (server, _) = common::setup().await;
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "success": true }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let uploader = HttpUploader::from_config(&RemoteConfig {
        endpoint: format!("{}/api", server.uri()),
        timeout_secs: 1,
        ..RemoteConfig::default()
    })
    .unwrap();

    let err = uploader
        .upload(SESSION, None, &common::sample_files())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

// Integration tests for the Google Chat / Drive transport against a mock server

use common::config::{AuthorizedUserToken, ChatConfig, ServiceAccountKey};
use common::errors::TransportError;
use common::transport::{ChatTransport, GoogleChat};
use serde_json::json;
use std::io::Write;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY: &str = include_str!("fixtures/test_service_account.pem");

fn chat_config(server: &MockServer, folder_id: &str) -> ChatConfig {
    ChatConfig {
        chat_api_base: server.uri(),
        drive_api_base: server.uri(),
        upload_api_base: server.uri(),
        folder_id: folder_id.to_string(),
        service_account: Some(ServiceAccountKey {
            client_email: "bot@project.iam.gserviceaccount.com".to_string(),
            private_key: TEST_KEY.to_string(),
            token_uri: format!("{}/token", server.uri()),
        }),
        user_token: Some(AuthorizedUserToken {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            token_uri: format!("{}/token", server.uri()),
        }),
        timeout_seconds: 5,
    }
}

async fn mount_tokens(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "drive-token",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "chat-token",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_upload_shares_file_in_folder() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "media"))
        .and(header("authorization", "Bearer drive-token"))
        .and(header("content-type", "application/pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/drive/v3/files/file-1"))
        .and(query_param("addParents", "folder-9"))
        .and(body_json(json!({ "name": "Sales_Q1_EU.pdf" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files/file-1/permissions"))
        .and(body_json(json!({ "type": "anyone", "role": "reader" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "perm-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .and(query_param("fields", "webViewLink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "webViewLink": "https://drive.google.com/file/d/file-1/view"
        })))
        .mount(&server)
        .await;

    let mut scratch = tempfile::NamedTempFile::new().unwrap();
    scratch.write_all(b"%PDF-1.5").unwrap();

    let chat = GoogleChat::from_config(&chat_config(&server, "folder-9")).unwrap();
    let link = chat.upload("Sales_Q1_EU.pdf", scratch.path()).await.unwrap();

    assert_eq!(link, "https://drive.google.com/file/d/file-1/view");
}

#[tokio::test]
async fn test_failed_upload_is_transport_error() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(403).set_body_string("storage quota exceeded"))
        .mount(&server)
        .await;

    let mut scratch = tempfile::NamedTempFile::new().unwrap();
    scratch.write_all(b"data").unwrap();

    let chat = GoogleChat::from_config(&chat_config(&server, "")).unwrap();
    let error = chat.upload("Ops__.csv", scratch.path()).await.unwrap_err();

    match error {
        TransportError::Upload(message) => assert!(message.contains("storage quota exceeded")),
        other => panic!("Expected upload error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_post_message_to_space() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/spaces/AAAA1234/messages"))
        .and(header("authorization", "Bearer chat-token"))
        .and(body_json(json!({ "text": "Numbers\nGoogle Drive link:\nhttps://d/1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "spaces/AAAA1234/messages/1" })))
        .expect(1)
        .mount(&server)
        .await;

    let chat = GoogleChat::from_config(&chat_config(&server, "")).unwrap();
    chat.post("AAAA1234", "Numbers\nGoogle Drive link:\nhttps://d/1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_credentials_are_reported() {
    let server = MockServer::start().await;
    let mut config = chat_config(&server, "");
    config.service_account = None;
    config.user_token = None;

    let chat = GoogleChat::from_config(&config).unwrap();

    assert!(matches!(
        chat.post("AAAA1234", "hello").await,
        Err(TransportError::Auth(_))
    ));
    assert!(matches!(
        chat.upload("x.pdf", std::path::Path::new("/nonexistent")).await,
        Err(TransportError::Auth(_))
    ));
}

// Google Chat transport
// Files are shared through Drive links; the links are posted into a chat space.

use crate::config::ChatConfig;
use crate::errors::TransportError;
use crate::transport::google_auth::TokenProvider;
use crate::transport::ChatTransport;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

const CHAT_SCOPE: &str = "https://www.googleapis.com/auth/chat.bot";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ShareLink {
    #[serde(rename = "webViewLink")]
    web_view_link: String,
}

/// GoogleChat uploads to Drive with a user token and posts as a service account
pub struct GoogleChat {
    client: Client,
    chat_api_base: String,
    drive_api_base: String,
    upload_api_base: String,
    folder_id: String,
    poster: Option<TokenProvider>,
    uploader: Option<TokenProvider>,
}

impl GoogleChat {
    pub fn from_config(config: &ChatConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TransportError::Chat(format!("Failed to create HTTP client: {}", e)))?;

        let poster = config
            .service_account
            .clone()
            .map(|key| TokenProvider::service_account(client.clone(), key, CHAT_SCOPE));
        let uploader = config
            .user_token
            .clone()
            .map(|token| TokenProvider::authorized_user(client.clone(), token));

        Ok(Self {
            client,
            chat_api_base: config.chat_api_base.trim_end_matches('/').to_string(),
            drive_api_base: config.drive_api_base.trim_end_matches('/').to_string(),
            upload_api_base: config.upload_api_base.trim_end_matches('/').to_string(),
            folder_id: config.folder_id.clone(),
            poster,
            uploader,
        })
    }

    async fn upload_token(&self) -> Result<String, TransportError> {
        match &self.uploader {
            Some(provider) => provider.access_token().await,
            None => Err(TransportError::Auth(
                "No Drive user token configured (chat.user_token)".to_string(),
            )),
        }
    }

    async fn post_token(&self) -> Result<String, TransportError> {
        match &self.poster {
            Some(provider) => provider.access_token().await,
            None => Err(TransportError::Auth(
                "No chat service account configured (chat.service_account)".to_string(),
            )),
        }
    }
}

async fn checked(response: Response, step: &str) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Upload(format!(
        "{} failed with {}: {}",
        step, status, body
    )))
}

#[async_trait]
impl ChatTransport for GoogleChat {
    #[instrument(skip(self, path), fields(file = %display_name))]
    async fn upload(&self, display_name: &str, path: &Path) -> Result<String, TransportError> {
        let token = self.upload_token().await?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Upload(format!("Cannot read {}: {}", path.display(), e)))?;
        let mime_type = mime_guess::from_path(display_name).first_or_octet_stream();
        debug!(mime_type = %mime_type, bytes = bytes.len(), "Uploading to Drive");

        let created: DriveFile = checked(
            self.client
                .post(format!("{}/upload/drive/v3/files", self.upload_api_base))
                .bearer_auth(&token)
                .query(&[("uploadType", "media"), ("fields", "id")])
                .header(reqwest::header::CONTENT_TYPE, mime_type.essence_str())
                .body(bytes)
                .send()
                .await
                .map_err(|e| TransportError::Upload(e.to_string()))?,
            "Drive upload",
        )
        .await?
        .json()
        .await
        .map_err(|e| TransportError::Upload(e.to_string()))?;

        let mut query = vec![("fields", "id")];
        if !self.folder_id.is_empty() {
            query.push(("addParents", self.folder_id.as_str()));
        }
        checked(
            self.client
                .patch(format!("{}/drive/v3/files/{}", self.drive_api_base, created.id))
                .bearer_auth(&token)
                .query(&query)
                .json(&json!({ "name": display_name }))
                .send()
                .await
                .map_err(|e| TransportError::Upload(e.to_string()))?,
            "Drive rename",
        )
        .await?;

        checked(
            self.client
                .post(format!(
                    "{}/drive/v3/files/{}/permissions",
                    self.drive_api_base, created.id
                ))
                .bearer_auth(&token)
                .json(&json!({ "type": "anyone", "role": "reader" }))
                .send()
                .await
                .map_err(|e| TransportError::Upload(e.to_string()))?,
            "Drive permission",
        )
        .await?;

        let link: ShareLink = checked(
            self.client
                .get(format!("{}/drive/v3/files/{}", self.drive_api_base, created.id))
                .bearer_auth(&token)
                .query(&[("fields", "webViewLink")])
                .send()
                .await
                .map_err(|e| TransportError::Upload(e.to_string()))?,
            "Drive share link",
        )
        .await?
        .json()
        .await
        .map_err(|e| TransportError::Upload(e.to_string()))?;

        info!(file_id = %created.id, share_url = %link.web_view_link, "File shared on Drive");
        Ok(link.web_view_link)
    }

    #[instrument(skip(self, text))]
    async fn post(&self, space_id: &str, text: &str) -> Result<(), TransportError> {
        let token = self.post_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v1/spaces/{}/messages",
                self.chat_api_base, space_id
            ))
            .bearer_auth(&token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| TransportError::Chat(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Chat(format!(
                "Posting to space {} failed with {}: {}",
                space_id, status, body
            )));
        }

        info!("Chat message posted");
        Ok(())
    }
}

#![doc = "HTTP implementation of the upload and commit contracts against the Google Photos Library API."]
//
//! # Photos client
//!
//! [`PhotosClient`] implements both collaborator traits from
//! [`gphotos_upload_core::contract`]:
//!
//! - `upload` streams the file body to `POST /v1/uploads` and returns the
//!   response body, which is the upload token.
//! - `commit` sends up to [`MAX_TOKENS_PER_COMMIT`] tokens to
//!   `POST /v1/mediaItems:batchCreate`.
//!
//! Each method is a single attempt; the pipeline owns retries and cancellation.

use async_trait::async_trait;
use gphotos_upload_core::contract::{
    BatchCommitter, ByteStream, CallError, UploadToken, Uploader, MAX_TOKENS_PER_COMMIT,
};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::credentials::Credentials;

pub const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateRequest<'a> {
    new_media_items: Vec<NewMediaItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItem<'a> {
    simple_media_item: SimpleMediaItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleMediaItem<'a> {
    upload_token: &'a str,
}

impl<'a> BatchCreateRequest<'a> {
    fn from_tokens(tokens: &'a [UploadToken]) -> Self {
        Self {
            new_media_items: tokens
                .iter()
                .map(|token| NewMediaItem {
                    simple_media_item: SimpleMediaItem {
                        upload_token: token.as_str(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<NewMediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItemResult {
    #[serde(default)]
    upload_token: Option<String>,
    #[serde(default)]
    status: Option<ItemStatus>,
}

#[derive(Debug, Deserialize)]
struct ItemStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

pub struct PhotosClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl PhotosClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gphotos-upload/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, "Initialized PhotosClient");
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Uploader for PhotosClient {
    async fn upload(&self, file_name: &str, content: ByteStream) -> Result<UploadToken, CallError> {
        tracing::debug!(file_name, "Uploading bytes");
        let body = reqwest::Body::wrap_stream(ReaderStream::new(content));

        let response = self
            .http
            .post(self.endpoint("/v1/uploads"))
            .bearer_auth(self.credentials.access_token())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-goog-upload-file-name", file_name)
            .header("x-goog-upload-protocol", "raw")
            .body(body)
            .send()
            .await?;

        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = ?e, file_name, "API error uploading bytes");
                return Err(Box::new(e));
            }
        };

        let raw_token = response.text().await?;
        if raw_token.is_empty() {
            return Err(format!("empty upload token returned for {file_name:?}").into());
        }
        Ok(UploadToken::new(raw_token))
    }
}

#[async_trait]
impl BatchCommitter for PhotosClient {
    async fn commit(&self, tokens: &[UploadToken]) -> Result<(), CallError> {
        if tokens.len() > MAX_TOKENS_PER_COMMIT {
            return Err(format!(
                "too many tokens, got {}, cannot handle more than {}",
                tokens.len(),
                MAX_TOKENS_PER_COMMIT
            )
            .into());
        }

        tracing::info!(count = tokens.len(), "Creating media items");
        let response = self
            .http
            .post(self.endpoint("/v1/mediaItems:batchCreate"))
            .bearer_auth(self.credentials.access_token())
            .json(&BatchCreateRequest::from_tokens(tokens))
            .send()
            .await?;

        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = ?e, count = tokens.len(), "API error creating media items");
                return Err(Box::new(e));
            }
        };

        // Per-item failures do not fail the batch; re-committing would duplicate the successes.
        let parsed: BatchCreateResponse = response.json().await.unwrap_or_default();
        for result in &parsed.new_media_item_results {
            if let Some(status) = result.status.as_ref().filter(|s| s.code != 0) {
                tracing::warn!(
                    upload_token = result.upload_token.as_deref().unwrap_or_default(),
                    code = status.code,
                    message = %status.message,
                    "Media item was not created"
                );
            }
        }
        Ok(())
    }
}

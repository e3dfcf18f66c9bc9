// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the third-party media upload API.
//!
//! Files are forwarded from memory as a multipart `file` part plus a `user`
//! field, authenticated with a bearer key. The API answers with a JSON body
//! whose `id` is the opaque reference later sent as a message `url`.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use chatbridge_config::model::MediaConfig;

use crate::error::MediaError;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    id: Option<String>,
}

/// A file received from the caller.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Uploads files to the media API.
#[derive(Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    upload_url: String,
    api_key: String,
    default_user: String,
}

impl std::fmt::Debug for MediaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClient")
            .field("upload_url", &self.upload_url)
            .field("api_key", &"[redacted]")
            .field("default_user", &self.default_user)
            .finish()
    }
}

impl MediaClient {
    pub fn new(
        upload_url: impl Into<String>,
        api_key: impl Into<String>,
        default_user: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MediaError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MediaError::Client)?;
        Ok(Self {
            http,
            upload_url: upload_url.into(),
            api_key: api_key.into(),
            default_user: default_user.into(),
        })
    }

    /// Build a client from `[media]`. Returns `None` when no API key is
    /// configured, which disables uploads.
    pub fn from_config(config: &MediaConfig) -> Result<Option<Self>, MediaError> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        Self::new(
            &config.upload_url,
            api_key,
            &config.user,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    /// Upload a file; returns the media API's file id.
    pub async fn upload(&self, file: UploadFile, user: Option<&str>) -> Result<String, MediaError> {
        let user = user
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_user)
            .to_owned();
        let size = file.bytes.len();

        let mut part = Part::bytes(file.bytes).file_name(file.file_name.clone());
        if let Some(content_type) = file.content_type.as_deref() {
            part = part
                .mime_str(content_type)
                .map_err(|_| MediaError::ContentType(content_type.to_owned()))?;
        }
        let form = Form::new().part("file", part).text("user", user);

        let response = self
            .http
            .post(&self.upload_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(MediaError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), file = %file.file_name, "media upload rejected");
            return Err(MediaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = response.json().await.map_err(MediaError::Request)?;
        let id = parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or(MediaError::MissingId)?;
        debug!(file = %file.file_name, bytes = size, media_id = %id, "media uploaded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png() -> UploadFile {
        UploadFile {
            file_name: "cat.png".into(),
            content_type: Some("image/png".into()),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    fn client(server: &MockServer) -> MediaClient {
        MediaClient::new(
            format!("{}/v1/files/upload", server.uri()),
            "app-test-key",
            "chatbridge",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upload_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files/upload"))
            .and(header("authorization", "Bearer app-test-key"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "file-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).upload(png(), Some("alice")).await.unwrap();
        assert_eq!(id, "file-123");
    }

    #[tokio::test]
    async fn upload_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let err = client(&server).upload(png(), None).await.unwrap_err();
        match err {
            MediaError::Status { status, body } => {
                assert_eq!(status, 413);
                assert_eq!(body, "too large");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn upload_without_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = client(&server).upload(png(), None).await.unwrap_err();
        assert!(matches!(err, MediaError::MissingId));
    }

    #[test]
    fn missing_api_key_disables_uploads() {
        let config = MediaConfig {
            api_key: None,
            ..MediaConfig::default()
        };
        assert!(MediaClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let client = MediaClient::new("http://x", "secret-key", "u", Duration::from_secs(1)).unwrap();
        assert!(!format!("{client:?}").contains("secret-key"));
    }
}

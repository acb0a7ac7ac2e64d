// src/services/storage_services.rs
use base64::{Engine as _, engine::general_purpose};
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use urlencoding::encode;

use crate::config::{StorageSettings, mask_key};
use crate::dtos::upload_dtos::{ApiErrorBody, UploadRequest, UploadedFile};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("media host returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Credentialed handle to the ImageKit HTTP API. Holds no state besides
/// configuration, so clones are cheap and can be shared freely.
#[derive(Clone)]
pub struct ImageKitClient {
    client: Client,
    private_key: Option<String>,
    url_endpoint: Option<String>,
    upload_url: String,
    api_url: String,
}

impl std::fmt::Debug for ImageKitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageKitClient")
            .field("private_key", &self.private_key.as_deref().map(mask_key))
            .field("url_endpoint", &self.url_endpoint)
            .field("upload_url", &self.upload_url)
            .finish()
    }
}

impl ImageKitClient {
    pub fn new(settings: StorageSettings) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(concat!("mediashare-be/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: StorageSettings) -> Self {
        Self {
            client,
            private_key: settings.private_key,
            url_endpoint: settings.url_endpoint.map(|e| e.trim_end_matches('/').to_string()),
            upload_url: settings.upload_url,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Whether a private key is present. Nothing is checked against the
    /// remote side.
    pub fn is_configured(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn url_endpoint(&self) -> Option<&str> {
        self.url_endpoint.as_deref()
    }

    fn private_key(&self) -> Result<&str, StorageError> {
        self.private_key
            .as_deref()
            .ok_or(StorageError::NotConfigured("IMAGEKIT_PRIVATE_KEY"))
    }

    /// Public URL of a stored path under the configured endpoint.
    pub fn url_for(&self, path: &str) -> Result<String, StorageError> {
        let endpoint = self
            .url_endpoint
            .as_deref()
            .ok_or(StorageError::NotConfigured("IMAGEKIT_URL_ENDPOINT"))?;
        Ok(format!("{}/{}", endpoint, path.trim_start_matches('/')))
    }

    /// Pushes the bytes to the media host and returns where they ended up.
    pub async fn upload(&self, req: UploadRequest) -> Result<UploadedFile, StorageError> {
        let key = self.private_key()?;

        debug!(
            "uploading {} ({}, {} bytes)",
            req.file_name,
            req.content_type,
            req.bytes.len()
        );

        let file = Part::bytes(req.bytes)
            .file_name(req.file_name.clone())
            .mime_str(&req.content_type)?;

        let mut form = Form::new()
            .part("file", file)
            .text("fileName", req.file_name.clone())
            .text("useUniqueFileName", req.use_unique_file_name.to_string());
        if let Some(folder) = req.folder {
            form = form.text("folder", folder);
        }
        if !req.tags.is_empty() {
            form = form.text("tags", req.tags.join(","));
        }

        let resp = self
            .client
            .post(&self.upload_url)
            .basic_auth(key, Some(""))
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &text));
        }

        let uploaded: UploadedFile = serde_json::from_str(&text)?;
        info!("uploaded {} -> {}", uploaded.name, uploaded.url);
        Ok(uploaded)
    }

    /// Removes a previously uploaded file by its id.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), StorageError> {
        let key = self.private_key()?;
        let url = format!("{}/files/{}", self.api_url, encode(file_id));

        let resp = self
            .client
            .delete(&url)
            .basic_auth(key, Some(""))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }
        debug!("deleted remote file {file_id}");
        Ok(())
    }
}

fn api_error(status: StatusCode, body: &str) -> StorageError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.help))
        .unwrap_or_else(|| body.to_string());
    StorageError::Api {
        status: status.as_u16(),
        message,
    }
}

impl UploadRequest {
    /// Accepts `data:<mime>;base64,<payload>` as sent by browsers, or a bare
    /// base64 string together with an explicit content type.
    pub fn from_data_url(
        file_name: impl Into<String>,
        data: &str,
        fallback_content_type: Option<&str>,
    ) -> Result<Self, StorageError> {
        let (content_type, payload) = match data.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| StorageError::InvalidPayload("data url without ','".into()))?;
                let content_type = header.strip_suffix(";base64").ok_or_else(|| {
                    StorageError::InvalidPayload("only base64 data urls are supported".into())
                })?;
                (content_type.to_string(), payload)
            }
            None => {
                let content_type = fallback_content_type.ok_or_else(|| {
                    StorageError::InvalidPayload("content type required for bare base64".into())
                })?;
                (content_type.to_string(), data)
            }
        };

        if content_type.parse::<mime::Mime>().is_err() {
            return Err(StorageError::InvalidPayload(format!(
                "bad content type: {content_type}"
            )));
        }

        let bytes = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| StorageError::InvalidPayload(format!("invalid base64: {e}")))?;

        Ok(Self::new(bytes, file_name, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(key: Option<&str>, endpoint: Option<&str>) -> ImageKitClient {
        ImageKitClient::new(StorageSettings {
            private_key: key.map(str::to_string),
            url_endpoint: endpoint.map(str::to_string),
            ..StorageSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn url_for_joins_endpoint_and_path() {
        let c = client(None, Some("https://ik.imagekit.io/demo/"));
        assert_eq!(
            c.url_for("/posts/cat.png").unwrap(),
            "https://ik.imagekit.io/demo/posts/cat.png"
        );
        assert_eq!(c.url_endpoint(), Some("https://ik.imagekit.io/demo"));
    }

    #[test]
    fn url_for_without_endpoint() {
        let c = client(Some("private_key"), None);
        assert!(matches!(
            c.url_for("x.png"),
            Err(StorageError::NotConfigured("IMAGEKIT_URL_ENDPOINT"))
        ));
    }

    #[tokio::test]
    async fn upload_without_key_fails_before_any_request() {
        let c = client(None, Some("https://ik.imagekit.io/demo"));
        assert!(!c.is_configured());
        let err = c
            .upload(UploadRequest::new(vec![1, 2, 3], "a.png", "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured("IMAGEKIT_PRIVATE_KEY")));
    }

    #[test]
    fn decodes_data_url() {
        let req = UploadRequest::from_data_url("hi.txt", "data:text/plain;base64,aGVsbG8=", None)
            .unwrap();
        assert_eq!(req.bytes, b"hello");
        assert_eq!(req.content_type, "text/plain");
        assert_eq!(req.file_name, "hi.txt");
        assert!(req.use_unique_file_name);
    }

    #[test]
    fn decodes_bare_base64_with_fallback_type() {
        let req = UploadRequest::from_data_url("hi.png", "aGVsbG8=", Some("image/png")).unwrap();
        assert_eq!(req.bytes, b"hello");
        assert_eq!(req.content_type, "image/png");
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(UploadRequest::from_data_url("x", "aGVsbG8=", None).is_err());
        assert!(UploadRequest::from_data_url("x", "data:image/png,raw", None).is_err());
        assert!(UploadRequest::from_data_url("x", "data:image/png;base64,@@@", None).is_err());
        assert!(UploadRequest::from_data_url("x", "data:nonsense;base64,aGVsbG8=", None).is_err());
    }

    #[test]
    fn api_error_prefers_message_field() {
        let err = api_error(
            StatusCode::FORBIDDEN,
            r#"{"message":"Your account cannot be authenticated.","help":"contact support"}"#,
        );
        match err {
            StorageError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Your account cannot be authenticated.");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("upstream down"));
    }
}

// src/dtos/upload_dtos.rs
use serde::{Deserialize, Serialize};

/// File to push to the media host.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    /// Remote folder, e.g. "/posts".
    pub folder: Option<String>,
    pub tags: Vec<String>,
    /// Let the host append a random suffix so names never collide.
    pub use_unique_file_name: bool,
}

impl UploadRequest {
    pub fn new(
        bytes: Vec<u8>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            content_type: content_type.into(),
            folder: None,
            tags: Vec::new(),
            use_unique_file_name: true,
        }
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Upload API response; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_id: String,
    pub name: String,
    pub url: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub size: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// Error body the API returns alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
    pub help: Option<String>,
}

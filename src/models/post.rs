use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::database::{ColumnDefaults, Session, StoreError};
use crate::dtos::upload_dtos::UploadedFile;
use crate::models::user::User;
use crate::repositories::user_repository::UserRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: Option<String>,
    pub url: String,
    pub file_type: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// What the upload path knows about a post before it is stored. `id` and
/// `created_at` are filled in from [`ColumnDefaults`] at insert time.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub user_id: Uuid,
    pub caption: Option<String>,
    pub url: String,
    pub file_type: String,
    pub file_name: String,
}

impl NewPost {
    /// Builds a post from a finished upload; `file_type` is the broad media
    /// category of `content_type`.
    pub fn from_upload(
        user_id: Uuid,
        caption: Option<String>,
        content_type: &str,
        uploaded: &UploadedFile,
    ) -> Self {
        Self {
            user_id,
            caption: caption.filter(|c| !c.trim().is_empty()),
            url: uploaded.url.clone(),
            file_type: media_category(content_type).to_string(),
            file_name: uploaded.name.clone(),
        }
    }

    /// Fills the defaulted columns. Called once per insert so each row gets
    /// a fresh id and the wall-clock time of that insert.
    pub fn into_post(self, defaults: &ColumnDefaults) -> Post {
        Post {
            id: defaults.new_id(),
            user_id: self.user_id,
            caption: self.caption,
            url: self.url,
            file_type: self.file_type,
            file_name: self.file_name,
            created_at: defaults.now(),
        }
    }
}

/// "image", "video" or "file".
pub fn media_category(content_type: &str) -> &'static str {
    match content_type.parse::<Mime>() {
        Ok(m) if m.type_() == mime::IMAGE => "image",
        Ok(m) if m.type_() == mime::VIDEO => "video",
        _ => "file",
    }
}

impl TryFrom<&Row> for Post {
    type Error = tokio_postgres::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            caption: row.try_get("caption")?,
            url: row.try_get("url")?,
            file_type: row.try_get("file_type")?,
            file_name: row.try_get("file_name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Post {
    /// The owning user. The foreign key guarantees it exists.
    pub async fn user(&self, session: &mut Session) -> Result<User, StoreError> {
        UserRepository::owner_of(session, self).await
    }
}

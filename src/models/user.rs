use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::database::{Session, StoreError};
use crate::models::post::Post;
use crate::repositories::post_repository::PostRepository;

/// Row of `users`. Everything except `id` belongs to the auth library; this
/// crate only stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

/// Payload for creating a user; flags fall back to active, unverified,
/// non-superuser.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_verified: bool,
}

fn default_true() -> bool {
    true
}

impl NewUser {
    pub fn new(email: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            hashed_password: hashed_password.into(),
            is_active: true,
            is_superuser: false,
            is_verified: false,
        }
    }
}

/// Partial update; `None` leaves the column alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_verified: Option<bool>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.hashed_password.is_none()
            && self.is_active.is_none()
            && self.is_superuser.is_none()
            && self.is_verified.is_none()
    }
}

impl TryFrom<&Row> for User {
    type Error = tokio_postgres::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            hashed_password: row.try_get("hashed_password")?,
            is_active: row.try_get("is_active")?,
            is_superuser: row.try_get("is_superuser")?,
            is_verified: row.try_get("is_verified")?,
        })
    }
}

impl User {
    /// Posts owned by this user, newest first.
    pub async fn posts(&self, session: &mut Session) -> Result<Vec<Post>, StoreError> {
        PostRepository::list_for_user(session, self.id).await
    }
}

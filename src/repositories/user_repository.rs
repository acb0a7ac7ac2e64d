// src/repositories/user_repository.rs
//
// The user store the auth library talks to: lookups, create, partial update,
// delete. Emails are stored trimmed and compared case-insensitively.
use log::debug;
use uuid::Uuid;

use crate::database::{Session, StoreError};
use crate::models::post::Post;
use crate::models::user::{NewUser, User, UserUpdate};

const USER_COLUMNS: &str = "id, email, hashed_password, is_active, is_superuser, is_verified";

pub struct UserRepository;

impl UserRepository {
    pub async fn create(session: &mut Session, new_user: NewUser) -> Result<User, StoreError> {
        let id = session.defaults().new_id();
        let sql = format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        );
        let row = session
            .query_one(
                &sql,
                &[
                    &id,
                    &new_user.email.trim(),
                    &new_user.hashed_password,
                    &new_user.is_active,
                    &new_user.is_superuser,
                    &new_user.is_verified,
                ],
            )
            .await?;
        debug!("user {id} created");
        Ok(User::try_from(&row)?)
    }

    pub async fn get(session: &mut Session, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = session.query_opt(&sql, &[&id]).await?;
        Ok(row.as_ref().map(User::try_from).transpose()?)
    }

    pub async fn get_by_email(session: &mut Session, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let row = session.query_opt(&sql, &[&email.trim()]).await?;
        Ok(row.as_ref().map(User::try_from).transpose()?)
    }

    /// Applies the `Some` fields of `update`. Returns `None` when no user has
    /// that id.
    pub async fn update(
        session: &mut Session,
        id: Uuid,
        update: UserUpdate,
    ) -> Result<Option<User>, StoreError> {
        if update.is_empty() {
            return Self::get(session, id).await;
        }
        let sql = format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                hashed_password = COALESCE($3, hashed_password), \
                is_active = COALESCE($4, is_active), \
                is_superuser = COALESCE($5, is_superuser), \
                is_verified = COALESCE($6, is_verified) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let email = update.email.as_deref().map(str::trim);
        let row = session
            .query_opt(
                &sql,
                &[
                    &id,
                    &email,
                    &update.hashed_password,
                    &update.is_active,
                    &update.is_superuser,
                    &update.is_verified,
                ],
            )
            .await?;
        Ok(row.as_ref().map(User::try_from).transpose()?)
    }

    /// Deletes the user; their posts go with them (ON DELETE CASCADE).
    /// Returns true when a row was removed.
    pub async fn delete(session: &mut Session, id: Uuid) -> Result<bool, StoreError> {
        let removed = session.execute("DELETE FROM users WHERE id = $1", &[&id]).await?;
        Ok(removed > 0)
    }

    pub async fn owner_of(session: &mut Session, post: &Post) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = session.query_one(&sql, &[&post.user_id]).await?;
        Ok(User::try_from(&row)?)
    }

    /// A user together with all of their posts, newest first.
    pub async fn get_with_posts(
        session: &mut Session,
        id: Uuid,
    ) -> Result<Option<(User, Vec<Post>)>, StoreError> {
        let Some(user) = Self::get(session, id).await? else {
            return Ok(None);
        };
        let posts = user.posts(session).await?;
        Ok(Some((user, posts)))
    }
}

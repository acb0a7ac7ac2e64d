// src/repositories/post_repository.rs
use log::debug;
use uuid::Uuid;

use crate::database::{Session, StoreError};
use crate::models::post::{NewPost, Post};

const POST_COLUMNS: &str = "id, user_id, caption, url, file_type, file_name, created_at";

pub struct PostRepository;

fn rows_to_posts(rows: Vec<tokio_postgres::Row>) -> Result<Vec<Post>, StoreError> {
    rows.iter()
        .map(|row| Post::try_from(row).map_err(StoreError::from))
        .collect()
}

impl PostRepository {
    /// Inserts a post. `id` and `created_at` are generated right here, once
    /// per call, from the session's column defaults.
    pub async fn create(session: &mut Session, new_post: NewPost) -> Result<Post, StoreError> {
        let post = new_post.into_post(session.defaults());

        let sql = format!(
            "INSERT INTO posts ({POST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {POST_COLUMNS}"
        );
        let row = session
            .query_one(
                &sql,
                &[
                    &post.id,
                    &post.user_id,
                    &post.caption,
                    &post.url,
                    &post.file_type,
                    &post.file_name,
                    &post.created_at,
                ],
            )
            .await?;

        debug!("post {} created for user {}", post.id, post.user_id);
        Ok(Post::try_from(&row)?)
    }

    pub async fn get(session: &mut Session, id: Uuid) -> Result<Option<Post>, StoreError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = session.query_opt(&sql, &[&id]).await?;
        Ok(row.as_ref().map(Post::try_from).transpose()?)
    }

    /// Newest first.
    pub async fn list_for_user(session: &mut Session, user_id: Uuid) -> Result<Vec<Post>, StoreError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE user_id = $1 ORDER BY created_at DESC, id"
        );
        let rows = session.query(&sql, &[&user_id]).await?;
        rows_to_posts(rows)
    }

    /// Feed query: newest first across all users.
    pub async fn list_recent(session: &mut Session, limit: i64) -> Result<Vec<Post>, StoreError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC, id LIMIT $1"
        );
        let rows = session.query(&sql, &[&limit.max(0)]).await?;
        rows_to_posts(rows)
    }

    /// The only mutable column besides ownership is the caption.
    pub async fn update_caption(
        session: &mut Session,
        id: Uuid,
        caption: Option<String>,
    ) -> Result<Option<Post>, StoreError> {
        let sql = format!("UPDATE posts SET caption = $2 WHERE id = $1 RETURNING {POST_COLUMNS}");
        let row = session.query_opt(&sql, &[&id, &caption]).await?;
        Ok(row.as_ref().map(Post::try_from).transpose()?)
    }

    /// Deletes a post only if `user_id` owns it. Returns the removed row so
    /// the caller can clean up the remote file.
    pub async fn delete_owned(
        session: &mut Session,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Post>, StoreError> {
        let sql = format!(
            "DELETE FROM posts WHERE id = $1 AND user_id = $2 RETURNING {POST_COLUMNS}"
        );
        let row = session.query_opt(&sql, &[&id, &user_id]).await?;
        Ok(row.as_ref().map(Post::try_from).transpose()?)
    }

    pub async fn count_for_user(session: &mut Session, user_id: Uuid) -> Result<i64, StoreError> {
        let row = session
            .query_one("SELECT COUNT(*) FROM posts WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(row.try_get(0)?)
    }
}

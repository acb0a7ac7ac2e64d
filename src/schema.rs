// Table definitions and the startup bootstrap.
//
// Column types stay portable (UUID, TEXT, VARCHAR, BOOLEAN, TIMESTAMPTZ).
// Ids and timestamps have no server-side defaults: they are produced by
// `ColumnDefaults` when a row is inserted.
use log::info;

use crate::database::{Database, StoreError};

const BOOTSTRAP_LOCK_KEY: i64 = 0x6d65_6469_6173_6872;

pub const CREATE_USERS: &str = "\
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email VARCHAR(320) NOT NULL,
    hashed_password VARCHAR(1024) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    CONSTRAINT users_email_key UNIQUE (email)
);
CREATE UNIQUE INDEX IF NOT EXISTS users_email_lower_idx ON users (lower(email));";

pub const CREATE_POSTS: &str = "\
CREATE TABLE IF NOT EXISTS posts (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    caption TEXT,
    url VARCHAR NOT NULL,
    file_type VARCHAR NOT NULL,
    file_name VARCHAR NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL
);
CREATE INDEX IF NOT EXISTS posts_user_id_idx ON posts (user_id);
CREATE INDEX IF NOT EXISTS posts_created_at_idx ON posts (created_at DESC);";

/// Creates any missing tables and indexes. Existing tables are left exactly
/// as they are; there is no migration step.
pub async fn create_all(db: &Database) -> Result<(), StoreError> {
    let mut session = db.session().await?;
    // concurrent CREATE ... IF NOT EXISTS can still collide; serialize them
    session
        .execute("SELECT pg_advisory_xact_lock($1)", &[&BOOTSTRAP_LOCK_KEY])
        .await?;
    // posts references users, so order matters
    session.batch_execute(CREATE_USERS).await?;
    session.batch_execute(CREATE_POSTS).await?;
    session.commit().await?;
    info!("schema ready (users, posts)");
    Ok(())
}

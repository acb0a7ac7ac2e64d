//! Storage core for a small media-sharing backend: users, posts, pooled
//! transactional sessions, and an ImageKit upload client.

pub mod config;
pub mod database;
pub mod dtos;
pub mod models;
pub mod repositories;
pub mod schema;
pub mod services;
pub mod state;

pub use database::{ColumnDefaults, ConstraintViolation, Database, Session, StoreError};
pub use state::AppState;

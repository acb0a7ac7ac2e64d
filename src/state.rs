use log::{info, warn};

use crate::config::{Settings, mask_key};
use crate::database::{Database, StoreError};
use crate::schema;
use crate::services::storage_services::{ImageKitClient, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Shared handles built once at startup and passed to whatever serves
/// requests. Cloning shares the same pool and HTTP client.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: ImageKitClient,
}

impl AppState {
    /// Builds the pool and the storage client. Does not touch the network.
    pub fn from_settings(settings: &Settings) -> Result<Self, StartupError> {
        let db = Database::connect(&settings.database)?;

        match settings.storage.private_key.as_deref() {
            Some(key) => info!("ImageKit key: {}", mask_key(key)),
            None => warn!("IMAGEKIT_PRIVATE_KEY not set; uploads will fail until it is"),
        }
        if settings.storage.url_endpoint.is_none() {
            warn!("IMAGEKIT_URL_ENDPOINT not set");
        }
        let storage = ImageKitClient::new(settings.storage.clone())?;

        Ok(Self { db, storage })
    }

    /// Startup sequence: build state, then make sure the tables exist.
    pub async fn bootstrap(settings: &Settings) -> Result<Self, StartupError> {
        let state = Self::from_settings(settings)?;
        schema::create_all(&state.db).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSettings, StorageSettings};

    #[tokio::test]
    async fn builds_without_credentials_or_database() {
        let settings = Settings {
            database: DatabaseSettings::new("postgres://nobody@127.0.0.1:1/none"),
            storage: StorageSettings::default(),
        };
        let state = AppState::from_settings(&settings).unwrap();
        assert!(!state.storage.is_configured());
        assert_eq!(state.db.status().size, 0);
    }
}

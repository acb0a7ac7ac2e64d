pub mod storage_services;

pub use storage_services::{ImageKitClient, StorageError};

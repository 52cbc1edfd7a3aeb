//! Session storage implementations for Jarvis.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use jarvis_config::{StorageBackend, StorageConfig};
use jarvis_core::error::SessionError;
use jarvis_core::session::SessionStore;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Open the store selected by `[storage]`.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn SessionStore>, SessionError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let path = config.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SessionError::Storage(format!("Cannot create {}: {e}", parent.display()))
                })?;
            }
            let store = SqliteStore::new(&format!("sqlite://{}", path.display())).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => Err(SessionError::Storage(
            "built without the `sqlite` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_memory_backend() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn open_sqlite_backend_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(path.clone()),
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        store.create_session(None).await.unwrap();
        assert!(path.exists());
    }
}

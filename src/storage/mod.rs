//! Storage module for face embedding persistence

pub mod fs;
pub mod locks;
pub mod sqlite;
pub mod traits;

use std::sync::Arc;

use crate::config::{IndexConfig, StorageBackend};
use crate::error::StorageError;

pub use fs::FsStore;
pub use sqlite::SqliteStore;
pub use traits::EmbeddingStore;

/// Open the store selected by `index.backend`
pub async fn open_store(config: &IndexConfig) -> Result<Arc<dyn EmbeddingStore>, StorageError> {
    let store: Arc<dyn EmbeddingStore> = match config.backend {
        StorageBackend::Fs => {
            let root = config.root.clone();
            let store = tokio::task::spawn_blocking(move || FsStore::open(root))
                .await
                .map_err(|e| StorageError::TaskAborted(e.to_string()))??;
            Arc::new(store)
        }
        StorageBackend::Sqlite => Arc::new(SqliteStore::new(config.sqlite_path()).await?),
    };
    Ok(store)
}

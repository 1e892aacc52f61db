//! SQLite storage implementation

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::traits::EmbeddingStore;
use crate::embedding::codec::{decode_unit, encode_unit};
use crate::embedding::{Embedding, EventId, FaceRecord, PhotoId};
use crate::error::{RecordCorrupt, StorageError};

/// SQLite-based embedding store, one row per face
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(format!("creating {}", parent.display()), e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;

        info!("SQLite embedding index opened at {}", db_path.display());
        Ok(store)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS face_embeddings (
                event_id INTEGER NOT NULL,
                photo_id INTEGER NOT NULL,
                face_index INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (event_id, photo_id, face_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema ready");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    async fn put(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        embeddings: &[Embedding],
    ) -> Result<(), StorageError> {
        if embeddings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM face_embeddings WHERE event_id = ? AND photo_id = ?")
            .bind(event_id.0)
            .bind(photo_id.0)
            .execute(&mut *tx)
            .await?;

        for (face_index, embedding) in embeddings.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO face_embeddings (event_id, photo_id, face_index, embedding)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(event_id.0)
            .bind(photo_id.0)
            .bind(face_index as i64)
            .bind(encode_unit(embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            "Stored {} faces for photo {} in event {}",
            embeddings.len(),
            photo_id,
            event_id
        );
        Ok(())
    }

    async fn list(&self, event_id: EventId) -> Result<Vec<FaceRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT photo_id, face_index, embedding
            FROM face_embeddings
            WHERE event_id = ?
            ORDER BY photo_id, face_index
            "#,
        )
        .bind(event_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;

        for row in &rows {
            match decode_row(event_id, row) {
                Ok(record) => records.push(record),
                Err(corrupt) => {
                    skipped += 1;
                    warn!("Skipping corrupt row in event {}: {}", event_id, corrupt);
                }
            }
        }

        if skipped > 0 {
            warn!(
                "Event {}: listed {} records, skipped {} corrupt rows",
                event_id,
                records.len(),
                skipped
            );
        }

        Ok(records)
    }

    async fn purge(&self, event_id: EventId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM face_embeddings WHERE event_id = ?")
            .bind(event_id.0)
            .execute(&self.pool)
            .await?;

        info!("Purged event {} ({} rows)", event_id, result.rows_affected());
        Ok(())
    }

    async fn count(&self, event_id: EventId) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM face_embeddings WHERE event_id = ?")
            .bind(event_id.0)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as usize)
    }
}

fn decode_row(event_id: EventId, row: &SqliteRow) -> Result<FaceRecord, RecordCorrupt> {
    let unreadable = |e: sqlx::Error| RecordCorrupt::Unreadable(e.to_string());

    let photo_id: i64 = row.try_get("photo_id").map_err(unreadable)?;
    let face_index: i64 = row.try_get("face_index").map_err(unreadable)?;
    let body: Vec<u8> = row.try_get("embedding").map_err(unreadable)?;

    let face_index = u32::try_from(face_index).map_err(|_| {
        RecordCorrupt::MalformedKey(format!("photo {} face {}", photo_id, face_index))
    })?;

    Ok(FaceRecord {
        event_id,
        photo_id: PhotoId(photo_id),
        face_index,
        embedding: decode_unit(&body)?,
    })
}

//! Storage abstraction traits
//!
//! Defines the interface for per-event embedding persistence.
//! Implementations can be swapped between the directory layout and SQLite.

use async_trait::async_trait;

use crate::embedding::{Embedding, EventId, FaceRecord, PhotoId};
use crate::error::StorageError;

/// Durable per-event face embedding storage.
///
/// Implementations must be thread-safe and async-compatible, and must keep
/// events isolated: nothing done to one event is observable through another.
#[async_trait]
pub trait EmbeddingStore: Send + Sync + 'static {
    /// Store one face record per embedding, with face indexes `0..n` in order.
    ///
    /// All records of the call become visible together or not at all. If the
    /// photo already has records they are replaced by this call's.
    async fn put(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        embeddings: &[Embedding],
    ) -> Result<(), StorageError>;

    /// All readable records of an event; empty when the event does not exist.
    ///
    /// Corrupt units are skipped and logged, never reported as a failure.
    async fn list(&self, event_id: EventId) -> Result<Vec<FaceRecord>, StorageError>;

    /// Delete every record of an event. Purging a missing event succeeds.
    async fn purge(&self, event_id: EventId) -> Result<(), StorageError>;

    /// Number of readable records of an event
    async fn count(&self, event_id: EventId) -> Result<usize, StorageError> {
        Ok(self.list(event_id).await?.len())
    }
}

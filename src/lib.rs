//! Event photo face index
//!
//! Indexes the faces found in an event's photos and answers "which photos is
//! this guest in?" from a selfie.

pub mod config;
pub mod embedding;
pub mod error;
pub mod matcher;
pub mod oracle;
pub mod service;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use embedding::{Embedding, EventId, FaceRecord, PhotoId};
pub use error::{IndexError, StorageError};
pub use matcher::Matcher;
pub use oracle::{EmbeddingOracle, OracleAdapter};
pub use service::{IndexService, IngestOutcome, QueryOutcome, ScanOutcome};
pub use storage::{open_store, EmbeddingStore, FsStore, SqliteStore};

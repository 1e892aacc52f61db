//! Error types
//!
//! `IndexError` is what callers of the index service see. Each variant maps to
//! a distinct outcome so a front end can translate them into distinct
//! responses. `RecordCorrupt` never leaves the storage layer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Caller-visible failure of an ingest, query or purge
#[derive(Debug, Error)]
pub enum IndexError {
    /// The oracle found no face in the submitted image
    #[error("no face detected in image")]
    NoFaceDetected,

    /// The submitted bytes are not a decodable image
    #[error("image could not be decoded: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Embedding extraction did not finish within the allowed time
    #[error("embedding oracle timed out after {0:?}")]
    OracleTimeout(Duration),

    /// The oracle itself reported an error
    #[error("embedding oracle failed: {0:#}")]
    OracleFailure(anyhow::Error),

    /// A folder scan was asked for a folder that does not exist
    #[error("folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    /// The durable medium could not be read or written
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl IndexError {
    /// Stable machine-readable code for this failure
    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::NoFaceDetected => "NO_FACE_DETECTED",
            IndexError::ImageDecode(_) => "IMAGE_DECODE_FAILURE",
            IndexError::OracleTimeout(_) => "ORACLE_TIMEOUT",
            IndexError::OracleFailure(_) => "ORACLE_FAILURE",
            IndexError::FolderNotFound(_) => "FOLDER_NOT_FOUND",
            IndexError::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// True when the failure is caused by the submitted image rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IndexError::NoFaceDetected | IndexError::ImageDecode(_) | IndexError::FolderNotFound(_)
        )
    }
}

/// Failure of the durable medium behind an embedding store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// The blocking task running the storage operation panicked or was cancelled
    #[error("storage task aborted: {0}")]
    TaskAborted(String),
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A single stored unit that cannot be turned back into a face record.
///
/// Listing skips these and keeps going.
#[derive(Debug, Error)]
pub enum RecordCorrupt {
    #[error("malformed unit key {0:?}")]
    MalformedKey(String),

    #[error("unrecognized unit header")]
    BadHeader,

    #[error("unit length mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unit checksum mismatch")]
    ChecksumMismatch,

    #[error("unit unreadable: {0}")]
    Unreadable(String),
}

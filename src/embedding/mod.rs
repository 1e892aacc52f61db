//! Embedding vectors, identifiers and face records

pub mod codec;

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::utils::math::euclidean_distance;

/// Identifier of an event (one index namespace)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

/// Identifier of a photo within an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub i64);

macro_rules! id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $ty {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($ty)
            }
        }

        impl From<i64> for $ty {
            fn from(value: i64) -> Self {
                $ty(value)
            }
        }
    };
}

id_impls!(EventId);
id_impls!(PhotoId);

impl EventId {
    /// Resolve an event id as sent by a client.
    ///
    /// Only the canonical decimal form names an event: `"7"` does, while
    /// `"07"`, `"+7"`, `" 7"` and `"abc"` name no event at all.
    pub fn parse_query(s: &str) -> Option<EventId> {
        let id: i64 = s.parse().ok()?;
        (id.to_string() == s).then_some(EventId(id))
    }
}

/// Fixed-length face feature vector produced by the embedding oracle.
///
/// Immutable once built; clones share the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    /// Create a new embedding from raw values (stored as given, no normalization)
    pub fn new(values: Vec<f32>) -> Self {
        Self(values.into())
    }

    /// Number of dimensions
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance to another embedding, `None` if dimensions differ
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        euclidean_distance(&self.0, &other.0)
    }

    /// Convert to little-endian bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Create from little-endian bytes, `None` if the length is not a multiple of 4
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }

        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Some(Self::new(values))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One stored face: an embedding tied to its event, photo and in-photo position
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    pub event_id: EventId,
    pub photo_id: PhotoId,
    /// Position of the face in the oracle's detection order for this photo
    pub face_index: u32,
    pub embedding: Embedding,
}

//! Persisted unit format
//!
//! Every stored face is one unit. Its key carries the photo id and face index,
//! so a unit whose body is damaged can still be identified (and skipped)
//! without reading anything else:
//!
//! ```text
//! event_{event_id}/photo_{photo_id}_face_{face_index}.emb
//! ```
//!
//! Body layout (little endian):
//!
//! ```text
//! magic "FEMB" | version u8 | dim u32 | dim x f32 | crc32 of all preceding bytes
//! ```

use super::{Embedding, EventId, PhotoId};
use crate::error::RecordCorrupt;

/// File extension of a stored unit
pub const UNIT_EXTENSION: &str = "emb";

const MAGIC: &[u8; 4] = b"FEMB";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4;
const CHECKSUM_LEN: usize = 4;

/// Directory (namespace) name of an event
pub fn event_dir_name(event_id: EventId) -> String {
    format!("event_{}", event_id)
}

/// Address of one unit within an event namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    pub photo_id: PhotoId,
    pub face_index: u32,
}

impl UnitKey {
    pub fn new(photo_id: PhotoId, face_index: u32) -> Self {
        Self {
            photo_id,
            face_index,
        }
    }

    /// Canonical unit name, e.g. `photo_101_face_0.emb`
    pub fn file_name(&self) -> String {
        format!(
            "photo_{}_face_{}.{}",
            self.photo_id, self.face_index, UNIT_EXTENSION
        )
    }

    /// Parse a unit name. Only the canonical form produced by `file_name` is accepted.
    pub fn parse(name: &str) -> Result<Self, RecordCorrupt> {
        let malformed = || RecordCorrupt::MalformedKey(name.to_string());

        let stem = name
            .strip_suffix(UNIT_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(malformed)?;
        let rest = stem.strip_prefix("photo_").ok_or_else(malformed)?;
        let (photo, face) = rest.rsplit_once("_face_").ok_or_else(malformed)?;

        let photo_id: i64 = photo.parse().map_err(|_| malformed())?;
        let face_index: u32 = face.parse().map_err(|_| malformed())?;
        let key = Self::new(PhotoId(photo_id), face_index);

        // Rejects "+5", "007" and friends so every unit has exactly one name
        if key.file_name() != name {
            return Err(malformed());
        }

        Ok(key)
    }
}

/// Serialize an embedding into a unit body
pub fn encode_unit(embedding: &Embedding) -> Vec<u8> {
    let values = embedding.as_slice();
    let mut buf = Vec::with_capacity(HEADER_LEN + values.len() * 4 + CHECKSUM_LEN);

    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    buf.extend_from_slice(&embedding.to_bytes());

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Deserialize a unit body, validating header, length and checksum
pub fn decode_unit(bytes: &[u8]) -> Result<Embedding, RecordCorrupt> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(RecordCorrupt::LengthMismatch {
            expected: HEADER_LEN + CHECKSUM_LEN,
            actual: bytes.len(),
        });
    }
    if &bytes[0..4] != MAGIC || bytes[4] != VERSION {
        return Err(RecordCorrupt::BadHeader);
    }

    let dim = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    let expected = dim
        .checked_mul(4)
        .and_then(|n| n.checked_add(HEADER_LEN + CHECKSUM_LEN))
        .ok_or(RecordCorrupt::BadHeader)?;
    if bytes.len() != expected {
        return Err(RecordCorrupt::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let (payload, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(payload) != stored {
        return Err(RecordCorrupt::ChecksumMismatch);
    }

    Embedding::from_bytes(&payload[HEADER_LEN..]).ok_or(RecordCorrupt::BadHeader)
}

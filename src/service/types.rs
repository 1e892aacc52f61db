//! Service layer types

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::embedding::{EventId, FaceRecord, PhotoId};

/// Photo ingestion result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub faces_indexed: usize,
    pub inference_time_ms: u64,
}

/// Selfie query result. An empty `matched_photo_ids` is a valid "no match".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub matched_photo_ids: BTreeSet<PhotoId>,
    /// Faces the oracle found in the selfie; only the first is matched
    pub faces_in_selfie: usize,
    pub candidates_scanned: usize,
    pub inference_time_ms: u64,
}

/// Folder scan result; `matches` holds file names in name order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub folder: String,
    pub scanned: usize,
    pub matches_count: usize,
    pub matches: Vec<String>,
    pub inference_time_ms: u64,
}

/// Per-photo face counts of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: EventId,
    pub faces: usize,
    pub photos: BTreeMap<PhotoId, usize>,
}

impl EventSummary {
    pub fn from_records(event_id: EventId, records: &[FaceRecord]) -> Self {
        let mut photos = BTreeMap::new();
        for record in records {
            *photos.entry(record.photo_id).or_insert(0) += 1;
        }

        Self {
            event_id,
            faces: records.len(),
            photos,
        }
    }
}

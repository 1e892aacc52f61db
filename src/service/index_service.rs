//! Index Service - Core business logic
//!
//! Orchestrates embedding extraction, storage and matching for the three
//! externally visible operations: ingest, query and purge. `scan_folder`
//! matches a selfie against a plain folder of photos without the index.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{Embedding, EventId, PhotoId};
use crate::error::{IndexError, StorageError};
use crate::matcher::Matcher;
use crate::oracle::{EmbeddingOracle, OracleAdapter};
use crate::storage::EmbeddingStore;

use super::types::*;

const PHOTO_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Event photo face index
pub struct IndexService<S: EmbeddingStore + ?Sized> {
    adapter: OracleAdapter,
    store: Arc<S>,
    matcher: Matcher,
}

impl<S: EmbeddingStore + ?Sized> IndexService<S> {
    /// Create a new index service
    pub fn new(config: &Config, oracle: Arc<dyn EmbeddingOracle>, store: Arc<S>) -> Self {
        Self {
            adapter: OracleAdapter::new(oracle, &config.oracle),
            store,
            matcher: Matcher::new(config.matching.threshold),
        }
    }

    /// Get a reference to the storage
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Index every face of a photo
    pub async fn ingest(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        image_data: &[u8],
    ) -> Result<IngestOutcome, IndexError> {
        self.ingest_with_timeout(event_id, photo_id, image_data, self.adapter.timeout())
            .await
    }

    /// Index every face of a photo, bounding extraction by `timeout`
    pub async fn ingest_with_timeout(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        image_data: &[u8],
        timeout: Duration,
    ) -> Result<IngestOutcome, IndexError> {
        let start = Instant::now();

        let embeddings = self.adapter.extract_with_timeout(image_data, timeout).await?;
        if embeddings.is_empty() {
            info!("No face detected in photo {} for event {}", photo_id, event_id);
            return Err(IndexError::NoFaceDetected);
        }

        self.store.put(event_id, photo_id, &embeddings).await?;

        let inference_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexed {} faces of photo {} for event {} in {}ms",
            embeddings.len(),
            photo_id,
            event_id,
            inference_time_ms
        );

        Ok(IngestOutcome {
            faces_indexed: embeddings.len(),
            inference_time_ms,
        })
    }

    /// Find the photos of an event containing the selfie's face
    pub async fn query(&self, event_id: EventId, selfie_data: &[u8]) -> Result<QueryOutcome, IndexError> {
        self.query_with_timeout(event_id, selfie_data, self.adapter.timeout())
            .await
    }

    /// Find the photos of an event containing the selfie's face, bounding
    /// extraction by `timeout`.
    ///
    /// Only the first detected face of the selfie is matched.
    pub async fn query_with_timeout(
        &self,
        event_id: EventId,
        selfie_data: &[u8],
        timeout: Duration,
    ) -> Result<QueryOutcome, IndexError> {
        self.run_query(&event_id.to_string(), Some(event_id), selfie_data, timeout)
            .await
    }

    /// Query with the event id exactly as the client sent it.
    ///
    /// A key that is not a canonical event id (`"07"`, `"abc"`) names no
    /// event, so it yields an empty match set once the selfie has been
    /// validated.
    pub async fn query_by_key(
        &self,
        event_key: &str,
        selfie_data: &[u8],
    ) -> Result<QueryOutcome, IndexError> {
        self.run_query(
            event_key,
            EventId::parse_query(event_key),
            selfie_data,
            self.adapter.timeout(),
        )
        .await
    }

    async fn run_query(
        &self,
        event_key: &str,
        event_id: Option<EventId>,
        selfie_data: &[u8],
        timeout: Duration,
    ) -> Result<QueryOutcome, IndexError> {
        let start = Instant::now();

        let faces = self.adapter.extract_with_timeout(selfie_data, timeout).await?;
        let Some(query) = faces.first() else {
            info!("No face detected in selfie for event {}", event_key);
            return Err(IndexError::NoFaceDetected);
        };
        if faces.len() > 1 {
            info!(
                "Selfie for event {} has {} faces, matching the first only",
                event_key,
                faces.len()
            );
        }

        let (matched_photo_ids, candidates_scanned) = match event_id {
            Some(event_id) => self.match_embedding(event_id, query).await?,
            None => {
                info!("Event key {:?} names no event", event_key);
                (HashSet::new(), 0)
            }
        };

        let inference_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Query on event {} matched {} photos out of {} faces in {}ms",
            event_key,
            matched_photo_ids.len(),
            candidates_scanned,
            inference_time_ms
        );

        Ok(QueryOutcome {
            matched_photo_ids: matched_photo_ids.into_iter().collect(),
            faces_in_selfie: faces.len(),
            candidates_scanned,
            inference_time_ms,
        })
    }

    /// Delete the whole index of an event. Purging a missing event succeeds.
    pub async fn purge(&self, event_id: EventId) -> Result<(), IndexError> {
        self.store.purge(event_id).await?;
        Ok(())
    }

    /// Per-photo face counts of an event
    pub async fn summary(&self, event_id: EventId) -> Result<EventSummary, IndexError> {
        let records = self.store.list(event_id).await?;
        Ok(EventSummary::from_records(event_id, &records))
    }

    /// Match a selfie against every photo in `folder`, encoding each on the fly.
    ///
    /// Nothing is read from or written to the index. Only `.jpg`, `.jpeg` and
    /// `.png` files (any case) are scanned; a file that cannot be read or
    /// encoded is counted as scanned, logged and skipped.
    pub async fn scan_folder(
        &self,
        folder: impl AsRef<Path>,
        selfie_data: &[u8],
    ) -> Result<ScanOutcome, IndexError> {
        let start = Instant::now();
        let folder = folder.as_ref();

        if !folder.is_dir() {
            return Err(IndexError::FolderNotFound(folder.to_path_buf()));
        }

        let faces = self.adapter.extract(selfie_data).await?;
        let Some(query) = faces.first() else {
            info!("No face detected in selfie for folder scan");
            return Err(IndexError::NoFaceDetected);
        };

        let photos = list_photo_files(folder)?;
        let mut matches = Vec::new();

        for (name, path) in &photos {
            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            match self.adapter.extract(&data).await {
                Ok(candidates) => {
                    if candidates.iter().any(|c| self.matcher.is_match(query, c)) {
                        matches.push(name.clone());
                    }
                }
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }

        let inference_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scanned {} photos in {}, {} matched in {}ms",
            photos.len(),
            folder.display(),
            matches.len(),
            inference_time_ms
        );

        Ok(ScanOutcome {
            folder: folder.display().to_string(),
            scanned: photos.len(),
            matches_count: matches.len(),
            matches,
            inference_time_ms,
        })
    }

    async fn match_embedding(
        &self,
        event_id: EventId,
        query: &Embedding,
    ) -> Result<(HashSet<PhotoId>, usize), IndexError> {
        let candidates = self.store.list(event_id).await?;
        let matched = self.matcher.match_candidates(query, &candidates);
        Ok((matched, candidates.len()))
    }
}

/// Photo files directly inside `folder`, sorted by name
fn list_photo_files(folder: &Path) -> Result<Vec<(String, PathBuf)>, IndexError> {
    let entries = std::fs::read_dir(folder)
        .map_err(|e| StorageError::io(format!("listing {}", folder.display()), e))?;

    let mut photos: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let lower = name.to_ascii_lowercase();
            PHOTO_EXTENSIONS
                .iter()
                .any(|ext| lower.ends_with(ext))
                .then(|| (name, entry.path()))
        })
        .collect();

    photos.sort();
    Ok(photos)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::storage::{FsStore, SqliteStore};
    use crate::test_support::{emb, png_with_marker, ScriptedOracle};

    const PHOTO_101: u8 = 1;
    const PHOTO_102: u8 = 2;
    const SELFIE_V1: u8 = 10;
    const SELFIE_STRANGER: u8 = 11;
    const GROUP_SELFIE: u8 = 12;
    const EMPTY_PHOTO: u8 = 20;

    /// v1 and v3 are 0.3 apart; the stranger is 0.6 from v1 and v2 and 0.55 from v3
    fn scenario_vectors() -> (Embedding, Embedding, Embedding, Embedding) {
        let v1 = emb(&[0.0, 0.0]);
        let v3 = emb(&[0.3, 0.0]);
        let x = 0.147_5_f32 / 0.6;
        let y = (0.36 - x * x).sqrt();
        let stranger = emb(&[x, y]);
        let v2 = emb(&[2.0 * x, 2.0 * y]);
        (v1, v2, v3, stranger)
    }

    fn scenario_oracle() -> ScriptedOracle {
        let (v1, v2, v3, stranger) = scenario_vectors();
        ScriptedOracle::new()
            .with_faces(PHOTO_101, vec![v1.clone(), v2])
            .with_faces(PHOTO_102, vec![v3])
            .with_faces(SELFIE_V1, vec![v1.clone()])
            .with_faces(SELFIE_STRANGER, vec![stranger.clone()])
            .with_faces(GROUP_SELFIE, vec![stranger, v1])
    }

    fn fs_service(dir: &tempfile::TempDir, oracle: ScriptedOracle) -> IndexService<FsStore> {
        let store = Arc::new(FsStore::open(dir.path().join("faces_index")).unwrap());
        IndexService::new(&Config::default(), Arc::new(oracle), store)
    }

    fn ids(values: &[i64]) -> BTreeSet<PhotoId> {
        values.iter().copied().map(PhotoId).collect()
    }

    #[test]
    fn test_scenario_vectors_have_expected_distances() {
        let (v1, v2, v3, stranger) = scenario_vectors();
        let close = |a: &Embedding, b: &Embedding, d: f32| {
            (a.euclidean_distance(b).unwrap() - d).abs() < 1e-4
        };
        assert!(close(&v1, &v3, 0.3));
        assert!(close(&stranger, &v1, 0.6));
        assert!(close(&stranger, &v2, 0.6));
        assert!(close(&stranger, &v3, 0.55));
    }

    #[tokio::test]
    async fn test_event_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        let event = EventId(7);

        let outcome = service.ingest(event, PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        assert_eq!(outcome.faces_indexed, 2);
        let outcome = service.ingest(event, PhotoId(102), &png_with_marker(PHOTO_102)).await.unwrap();
        assert_eq!(outcome.faces_indexed, 1);

        // v3 lies 0.3 from v1, inside the inclusive 0.5 threshold, so photo 102 matches too
        let outcome = service.query(event, &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[101, 102]));
        assert_eq!(outcome.candidates_scanned, 3);
        assert_eq!(outcome.faces_in_selfie, 1);

        let outcome = service.query(event, &png_with_marker(SELFIE_STRANGER)).await.unwrap();
        assert!(outcome.matched_photo_ids.is_empty());
    }

    #[tokio::test]
    async fn test_event_scenario_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("faces.db")).await.unwrap());
        let service = IndexService::new(&Config::default(), Arc::new(scenario_oracle()), store);
        let event = EventId(7);

        service.ingest(event, PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        service.ingest(event, PhotoId(102), &png_with_marker(PHOTO_102)).await.unwrap();

        let outcome = service.query(event, &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[101, 102]));
    }

    #[tokio::test]
    async fn test_tighter_threshold_excludes_neighbour() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(dir.path()).unwrap());
        let mut config = Config::default();
        config.matching.threshold = 0.25;
        let service = IndexService::new(&config, Arc::new(scenario_oracle()), store);

        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        service.ingest(EventId(7), PhotoId(102), &png_with_marker(PHOTO_102)).await.unwrap();

        let outcome = service.query(EventId(7), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[101]));
    }

    #[tokio::test]
    async fn test_query_uses_first_selfie_face() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();

        // The group selfie's first face is the stranger; v1 comes second and is ignored
        let outcome = service.query(EventId(7), &png_with_marker(GROUP_SELFIE)).await.unwrap();
        assert_eq!(outcome.faces_in_selfie, 2);
        assert!(outcome.matched_photo_ids.is_empty());
    }

    #[tokio::test]
    async fn test_query_empty_event_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        let outcome = service.query(EventId(99), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert!(outcome.matched_photo_ids.is_empty());
        assert_eq!(outcome.candidates_scanned, 0);
    }

    #[tokio::test]
    async fn test_query_by_key_needs_canonical_event_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();

        let outcome = service.query_by_key("7", &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[101]));

        for key in ["07", "+7", " 7", "abc"] {
            let outcome = service.query_by_key(key, &png_with_marker(SELFIE_V1)).await.unwrap();
            assert!(outcome.matched_photo_ids.is_empty(), "{key:?} matched photos");
            assert_eq!(outcome.candidates_scanned, 0);
            assert_eq!(outcome.faces_in_selfie, 1);
        }

        // The selfie is still validated for a key naming no event
        let err = service
            .query_by_key("abc", &png_with_marker(EMPTY_PHOTO))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NoFaceDetected));
    }

    #[tokio::test]
    async fn test_scan_folder_matches_photo_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        let photos = dir.path().join("photos");
        std::fs::create_dir(&photos).unwrap();
        std::fs::write(photos.join("a.png"), png_with_marker(PHOTO_101)).unwrap();
        std::fs::write(photos.join("b.PNG"), png_with_marker(PHOTO_102)).unwrap();
        std::fs::write(photos.join("c.jpg"), png_with_marker(SELFIE_STRANGER)).unwrap();
        std::fs::write(photos.join("d.jpeg"), png_with_marker(EMPTY_PHOTO)).unwrap();
        std::fs::write(photos.join("broken.png"), b"not really a png").unwrap();
        std::fs::create_dir(photos.join("album.png")).unwrap();
        // Not a photo extension, never scanned
        std::fs::write(photos.join("e.gif"), png_with_marker(PHOTO_101)).unwrap();
        std::fs::write(photos.join("notes.txt"), b"hello").unwrap();

        let outcome = service
            .scan_folder(&photos, &png_with_marker(SELFIE_V1))
            .await
            .unwrap();
        assert_eq!(outcome.scanned, 6);
        assert_eq!(outcome.matches, vec!["a.png".to_string(), "b.PNG".to_string()]);
        assert_eq!(outcome.matches_count, 2);

        // The index is not touched
        assert!(!dir.path().join("faces_index").join("event_7").exists());
    }

    #[tokio::test]
    async fn test_scan_folder_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        let err = service
            .scan_folder(dir.path().join("missing"), &png_with_marker(SELFIE_V1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FOLDER_NOT_FOUND");

        let err = service
            .scan_folder(dir.path(), &png_with_marker(EMPTY_PHOTO))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NoFaceDetected));
    }

    #[tokio::test]
    async fn test_no_face_ingest_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();

        let err = service
            .ingest(EventId(7), PhotoId(103), &png_with_marker(EMPTY_PHOTO))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NoFaceDetected));
        assert_eq!(service.store().count(EventId(7)).await.unwrap(), 2);

        // Nothing created for an event that never got a face
        let err = service
            .ingest(EventId(8), PhotoId(1), &png_with_marker(EMPTY_PHOTO))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NO_FACE_DETECTED");
        assert!(!dir.path().join("faces_index").join("event_8").exists());
    }

    #[tokio::test]
    async fn test_query_without_face_is_distinct_from_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        let err = service.query(EventId(7), &png_with_marker(EMPTY_PHOTO)).await.unwrap_err();
        assert!(matches!(err, IndexError::NoFaceDetected));

        let err = service.query(EventId(7), b"definitely not an image").await.unwrap_err();
        assert_eq!(err.kind(), "IMAGE_DECODE_FAILURE");
    }

    #[tokio::test]
    async fn test_timeout_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = scenario_oracle().with_delay(Duration::from_millis(300));
        let service = fs_service(&dir, oracle);

        let err = service
            .ingest_with_timeout(
                EventId(7),
                PhotoId(101),
                &png_with_marker(PHOTO_101),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::OracleTimeout(_)));
        assert_eq!(service.store().count(EventId(7)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_events_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        service.ingest(EventId(1), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        service.ingest(EventId(2), PhotoId(201), &png_with_marker(PHOTO_101)).await.unwrap();

        let outcome = service.query(EventId(2), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[201]));

        service.purge(EventId(2)).await.unwrap();
        let outcome = service.query(EventId(1), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids, ids(&[101]));
        let outcome = service.query(EventId(2), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert!(outcome.matched_photo_ids.is_empty());
    }

    #[tokio::test]
    async fn test_purge_twice_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();

        service.purge(EventId(7)).await.unwrap();
        service.purge(EventId(7)).await.unwrap();
        assert_eq!(service.summary(EventId(7)).await.unwrap().faces, 0);
    }

    #[tokio::test]
    async fn test_query_survives_corrupt_unit() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        service.ingest(EventId(7), PhotoId(102), &png_with_marker(PHOTO_102)).await.unwrap();

        let unit = dir
            .path()
            .join("faces_index")
            .join("event_7")
            .join("photo_101_face_0.emb");
        std::fs::write(&unit, b"truncated").unwrap();

        let outcome = service.query(EventId(7), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.candidates_scanned, 2);
        assert_eq!(outcome.matched_photo_ids, ids(&[102]));
    }

    #[tokio::test]
    async fn test_reingest_replaces_photo_faces() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());

        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_101)).await.unwrap();
        service.ingest(EventId(7), PhotoId(101), &png_with_marker(PHOTO_102)).await.unwrap();

        let summary = service.summary(EventId(7)).await.unwrap();
        assert_eq!(summary.faces, 1);
        assert_eq!(summary.photos[&PhotoId(101)], 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let service = fs_service(&dir, scenario_oracle());
        std::fs::write(dir.path().join("faces_index").join("event_5"), b"blocker").unwrap();

        let err = service
            .ingest(EventId(5), PhotoId(1), &png_with_marker(PHOTO_101))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "STORAGE_FAILURE");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_same_event() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(fs_service(&dir, scenario_oracle()));

        let mut handles = Vec::new();
        for photo in 0..12i64 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .ingest(EventId(7), PhotoId(photo), &png_with_marker(PHOTO_101))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().faces_indexed, 2);
        }

        let summary = service.summary(EventId(7)).await.unwrap();
        assert_eq!(summary.faces, 24);
        assert!(summary.photos.values().all(|&n| n == 2));

        let outcome = service.query(EventId(7), &png_with_marker(SELFIE_V1)).await.unwrap();
        assert_eq!(outcome.matched_photo_ids.len(), 12);
    }
}

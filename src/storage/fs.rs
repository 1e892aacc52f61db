//! Directory-backed embedding store
//!
//! ```text
//! <root>/event_<event_id>/photo_<photo_id>_face_<face_index>.emb
//! ```
//!
//! Entries whose names start with `.` are bookkeeping (staged writes, units
//! set aside during a replace, purge tombstones) and are never listed.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::EventLocks;
use super::traits::EmbeddingStore;
use crate::embedding::codec::{decode_unit, encode_unit, event_dir_name, UnitKey};
use crate::embedding::{Embedding, EventId, FaceRecord, PhotoId};
use crate::error::{RecordCorrupt, StorageError};

const STAGE_PREFIX: &str = ".stage-";
const ASIDE_PREFIX: &str = ".aside-";
const TOMBSTONE_PREFIX: &str = ".purge-";

/// Filesystem embedding store, one directory per event
#[derive(Clone)]
pub struct FsStore {
    inner: Arc<FsInner>,
}

struct FsInner {
    root: PathBuf,
    locks: EventLocks,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// Leftovers of interrupted writes and purges are cleaned up here.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StorageError::io(format!("creating index root {}", root.display()), e))?;

        let inner = FsInner {
            root,
            locks: EventLocks::new(),
        };
        inner.recover()?;

        info!("Embedding index opened at {}", inner.root.display());
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Run a filesystem operation on the blocking pool
    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&FsInner) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StorageError::TaskAborted(e.to_string()))?
    }
}

#[async_trait]
impl EmbeddingStore for FsStore {
    async fn put(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        embeddings: &[Embedding],
    ) -> Result<(), StorageError> {
        if embeddings.is_empty() {
            return Ok(());
        }
        let embeddings = embeddings.to_vec();
        self.run(move |inner| {
            inner.with_event(event_id, |inner| inner.put(event_id, photo_id, &embeddings))
        })
        .await
    }

    async fn list(&self, event_id: EventId) -> Result<Vec<FaceRecord>, StorageError> {
        self.run(move |inner| inner.with_event(event_id, |inner| inner.list(event_id)))
            .await
    }

    async fn purge(&self, event_id: EventId) -> Result<(), StorageError> {
        self.run(move |inner| inner.with_event(event_id, |inner| inner.purge(event_id)))
            .await
    }
}

impl FsInner {
    /// Run `op` on an event, then drop the event's lock if nobody else holds it
    fn with_event<T>(&self, event_id: EventId, op: impl FnOnce(&Self) -> T) -> T {
        let out = op(self);
        self.locks.release(event_id);
        out
    }

    fn event_dir(&self, event_id: EventId) -> PathBuf {
        self.root.join(event_dir_name(event_id))
    }

    fn put(
        &self,
        event_id: EventId,
        photo_id: PhotoId,
        embeddings: &[Embedding],
    ) -> Result<(), StorageError> {
        let lock = self.locks.get(event_id);
        let _guard = lock.write();

        let dir = self.event_dir(event_id);
        create_dir_if_absent(&dir)?;

        let mut commit = PutCommit::new(&dir);
        match commit.apply(photo_id, embeddings) {
            Ok(()) => {
                commit.finish();
                sync_dir(&dir);
                debug!(
                    "Stored {} faces for photo {} in event {}",
                    embeddings.len(),
                    photo_id,
                    event_id
                );
                Ok(())
            }
            Err(e) => {
                warn!("Rolling back put of photo {} in event {}: {}", photo_id, event_id, e);
                commit.rollback();
                Err(e)
            }
        }
    }

    fn list(&self, event_id: EventId) -> Result<Vec<FaceRecord>, StorageError> {
        let lock = self.locks.get(event_id);
        let _guard = lock.read();

        let dir = self.event_dir(event_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(format!("listing {}", dir.display()), e)),
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            match read_unit(&entry.path(), &name) {
                Ok((key, embedding)) => records.push(FaceRecord {
                    event_id,
                    photo_id: key.photo_id,
                    face_index: key.face_index,
                    embedding,
                }),
                Err(corrupt) => {
                    skipped += 1;
                    warn!("Skipping corrupt unit {} in event {}: {}", name, event_id, corrupt);
                }
            }
        }

        if skipped > 0 {
            warn!(
                "Event {}: listed {} records, skipped {} corrupt units",
                event_id,
                records.len(),
                skipped
            );
        }

        records.sort_by_key(|r| (r.photo_id, r.face_index));
        Ok(records)
    }

    fn purge(&self, event_id: EventId) -> Result<(), StorageError> {
        let dir = self.event_dir(event_id);
        let tombstone = self.root.join(format!(
            "{}{}-{}",
            TOMBSTONE_PREFIX,
            event_dir_name(event_id),
            Uuid::new_v4().simple()
        ));

        {
            let lock = self.locks.get(event_id);
            let _guard = lock.write();

            match fs::rename(&dir, &tombstone) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Event {} has no index, nothing to purge", event_id);
                    return Ok(());
                }
                Err(e) => {
                    return Err(StorageError::io(format!("purging {}", dir.display()), e));
                }
            }
        }

        // Already invisible; a failure here only leaves garbage for the next open
        if let Err(e) = fs::remove_dir_all(&tombstone) {
            warn!("Purged event {} but could not delete {}: {}", event_id, tombstone.display(), e);
        }

        info!("Purged event {}", event_id);
        Ok(())
    }

    /// Clean up after a crash mid-put or mid-purge
    fn recover(&self) -> Result<(), StorageError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StorageError::io(format!("scanning {}", self.root.display()), e))?;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(TOMBSTONE_PREFIX) {
                info!("Removing interrupted purge {}", path.display());
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
            } else if name.starts_with("event_") && path.is_dir() {
                recover_event_dir(&path);
            }
        }

        Ok(())
    }
}

/// Staged, all-or-nothing write of one photo's units
struct PutCommit<'a> {
    dir: &'a Path,
    batch: String,
    /// (staged path, final path)
    staged: Vec<(PathBuf, PathBuf)>,
    /// Final paths already holding new units
    published: Vec<PathBuf>,
    /// (aside path, original path) of the units being replaced
    set_aside: Vec<(PathBuf, PathBuf)>,
}

impl<'a> PutCommit<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            batch: Uuid::new_v4().simple().to_string(),
            staged: Vec::new(),
            published: Vec::new(),
            set_aside: Vec::new(),
        }
    }

    fn apply(&mut self, photo_id: PhotoId, embeddings: &[Embedding]) -> Result<(), StorageError> {
        self.stage(photo_id, embeddings)?;
        self.set_aside(photo_id)?;
        self.publish()
    }

    /// Write every unit under a hidden name and fsync it
    fn stage(&mut self, photo_id: PhotoId, embeddings: &[Embedding]) -> Result<(), StorageError> {
        for (face_index, embedding) in embeddings.iter().enumerate() {
            let name = UnitKey::new(photo_id, face_index as u32).file_name();
            let staged = self.dir.join(format!("{}{}-{}", STAGE_PREFIX, self.batch, name));

            // Recorded before writing so a partial file is removed on rollback
            self.staged.push((staged.clone(), self.dir.join(&name)));
            write_synced(&staged, &encode_unit(embedding))
                .map_err(|e| StorageError::io(format!("writing {}", staged.display()), e))?;
        }
        Ok(())
    }

    /// Move the photo's current units out of the listed namespace
    fn set_aside(&mut self, photo_id: PhotoId) -> Result<(), StorageError> {
        let entries = fs::read_dir(self.dir)
            .map_err(|e| StorageError::io(format!("listing {}", self.dir.display()), e))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| StorageError::io(format!("listing {}", self.dir.display()), e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            if matches!(UnitKey::parse(name), Ok(key) if key.photo_id == photo_id) {
                let original = entry.path();
                let aside = self.dir.join(format!("{}{}-{}", ASIDE_PREFIX, self.batch, name));
                fs::rename(&original, &aside)
                    .map_err(|e| StorageError::io(format!("replacing {}", original.display()), e))?;
                self.set_aside.push((aside, original));
            }
        }
        Ok(())
    }

    /// Rename staged units to their final names
    fn publish(&mut self) -> Result<(), StorageError> {
        for (staged, final_path) in &self.staged {
            fs::rename(staged, final_path)
                .map_err(|e| StorageError::io(format!("publishing {}", final_path.display()), e))?;
            self.published.push(final_path.clone());
        }
        Ok(())
    }

    /// Drop the replaced units
    fn finish(self) {
        for (aside, _) in &self.set_aside {
            if let Err(e) = fs::remove_file(aside) {
                warn!("Could not remove replaced unit {}: {}", aside.display(), e);
            }
        }
    }

    /// Undo everything: remove new units, restore replaced ones
    fn rollback(self) {
        for path in &self.published {
            remove_if_present(path);
        }
        for (staged, _) in &self.staged {
            remove_if_present(staged);
        }
        for (aside, original) in &self.set_aside {
            if let Err(e) = fs::rename(aside, original) {
                warn!("Could not restore {}: {}", original.display(), e);
            }
        }
    }
}

/// Idempotent create-if-absent; concurrent first writers all succeed
fn create_dir_if_absent(dir: &Path) -> Result<(), StorageError> {
    match fs::create_dir(dir) {
        Ok(()) => {
            debug!("Created event directory {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(StorageError::io(format!("creating {}", dir.display()), e)),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Persist renames in `dir`. Not every platform can fsync a directory.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|f| f.sync_all()) {
        debug!("Directory sync of {} skipped: {}", dir.display(), e);
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

fn read_unit(path: &Path, name: &str) -> Result<(UnitKey, Embedding), RecordCorrupt> {
    let key = UnitKey::parse(name)?;
    let bytes = fs::read(path).map_err(|e| RecordCorrupt::Unreadable(e.to_string()))?;
    Ok((key, decode_unit(&bytes)?))
}

/// Drop staged files and settle set-aside units of an interrupted put.
///
/// Set-aside units are restored only when no unit of their photo made it to
/// its final name; otherwise the new write had started publishing and wins.
fn recover_event_dir(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut published_photos = HashSet::new();
    let mut asides = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGE_PREFIX) {
            remove_if_present(&entry.path());
        } else if let Some(rest) = name.strip_prefix(ASIDE_PREFIX) {
            let original = rest.split_once('-').map(|(_, unit)| unit.to_string());
            asides.push((entry.path(), original));
        } else if let Ok(key) = UnitKey::parse(&name) {
            published_photos.insert(key.photo_id);
        }
    }

    for (aside, original) in asides {
        let restore_key = original
            .as_deref()
            .and_then(|unit| UnitKey::parse(unit).ok())
            .filter(|key| !published_photos.contains(&key.photo_id));

        match restore_key {
            Some(key) => {
                let target = dir.join(key.file_name());
                info!("Restoring {} after interrupted replace", target.display());
                if let Err(e) = fs::rename(&aside, &target) {
                    warn!("Could not restore {}: {}", target.display(), e);
                }
            }
            None => remove_if_present(&aside),
        }
    }
}

//! File-backed narrative store: one JSON document per narrative.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use world_rules::NarrativeId;

use super::{NarrativeRecord, NarrativeStore, StoreError};

const EXTENSION: &str = "json";

/// Stores each record as `<dir>/<narrative id>.json`.
///
/// Writes go to a temporary file that is flushed to disk and then renamed over the old
/// one, so a record on disk is always either the previous or the new revision.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Opened file store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: NarrativeId) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    async fn read(&self, id: NarrativeId) -> Result<NarrativeRecord, StoreError> {
        let raw = match tokio::fs::read(self.record_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write(&self, record: &NarrativeRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.narrative_id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        let raw = serde_json::to_vec_pretty(record)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&raw).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl NarrativeStore for FileStore {
    async fn create(&self, record: NarrativeRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(self.record_path(record.narrative_id)).await? {
            return Err(StoreError::AlreadyExists(record.narrative_id));
        }
        self.write(&record).await
    }

    async fn load(&self, id: NarrativeId) -> Result<NarrativeRecord, StoreError> {
        self.read(id).await
    }

    async fn commit(&self, mut record: NarrativeRecord) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let stored = self.read(record.narrative_id).await?;
        if stored.revision != record.revision {
            return Err(StoreError::Conflict {
                id: record.narrative_id,
                expected: record.revision,
                found: stored.revision,
            });
        }

        record.revision += 1;
        self.write(&record).await?;
        Ok(record.revision)
    }

    async fn delete(&self, id: NarrativeId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<NarrativeId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| uuid::Uuid::parse_str(s).ok());
            if let Some(uuid) = parsed {
                ids.push(NarrativeId::from_uuid(uuid));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

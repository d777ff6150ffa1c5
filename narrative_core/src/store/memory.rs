//! In-memory narrative store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use world_rules::NarrativeId;

use super::{NarrativeRecord, NarrativeStore, StoreError};

/// Keeps records in a concurrent map. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<NarrativeId, NarrativeRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl NarrativeStore for InMemoryStore {
    async fn create(&self, record: NarrativeRecord) -> Result<(), StoreError> {
        match self.records.entry(record.narrative_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.narrative_id)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn load(&self, id: NarrativeId) -> Result<NarrativeRecord, StoreError> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn commit(&self, mut record: NarrativeRecord) -> Result<u64, StoreError> {
        let id = record.narrative_id;
        let mut stored = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.revision != record.revision {
            return Err(StoreError::Conflict {
                id,
                expected: record.revision,
                found: stored.revision,
            });
        }

        record.revision += 1;
        let revision = record.revision;
        *stored = record;
        Ok(revision)
    }

    async fn delete(&self, id: NarrativeId) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<NarrativeId>, StoreError> {
        let mut ids: Vec<_> = self.records.iter().map(|r| *r.key()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_rules::StoryId;

    fn record() -> NarrativeRecord {
        NarrativeRecord::new(NarrativeId::new(), StoryId::new())
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let store = InMemoryStore::new();
        let record = record();
        store.create(record.clone()).await.unwrap();

        assert_eq!(store.load(record.narrative_id).await.unwrap(), record);
        assert!(matches!(
            store.create(record.clone()).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_bumps_revision() {
        let store = InMemoryStore::new();
        let record = record();
        store.create(record.clone()).await.unwrap();

        let mut loaded = store.load(record.narrative_id).await.unwrap();
        loaded.world_map.cancel_travel();
        assert_eq!(store.commit(loaded).await.unwrap(), 1);
        assert_eq!(store.load(record.narrative_id).await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = InMemoryStore::new();
        let record = record();
        store.create(record.clone()).await.unwrap();

        let first = store.load(record.narrative_id).await.unwrap();
        let second = store.load(record.narrative_id).await.unwrap();
        store.commit(first).await.unwrap();

        assert!(matches!(
            store.commit(second).await,
            Err(StoreError::Conflict {
                expected: 0,
                found: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryStore::new();
        let record = record();
        let id = record.narrative_id;
        store.create(record).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.load(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_commit_unknown_narrative() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.commit(record()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}

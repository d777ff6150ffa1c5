//! Narrative persistence.
//!
//! A narrative is persisted as one [`NarrativeRecord`]: messages, world map, lore state
//! and the navigation journal together. Writing the record is the atomic multi-row write
//! a turn needs, and deleting it is the cascade delete. Commits are optimistic: a record
//! carries the revision it was loaded at and the store refuses it if another writer
//! committed in between.

mod file;
mod memory;

pub use file::*;
pub use memory::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use world_rules::{NarrativeId, NavigationJournal, StaticEntry, StoryId, WorldMap};

use crate::lore::LoreTriggerTracker;
use crate::timeline::MessageTimeline;

/// Errors raised by a narrative store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("narrative not found: {0}")]
    NotFound(NarrativeId),

    #[error("narrative already exists: {0}")]
    AlreadyExists(NarrativeId),

    #[error("narrative {id} changed concurrently (expected revision {expected}, found {found})")]
    Conflict {
        id: NarrativeId,
        expected: u64,
        found: u64,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything persisted for one narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRecord {
    pub narrative_id: NarrativeId,
    pub story_id: StoryId,

    /// Incremented by every successful commit.
    pub revision: u64,

    pub timeline: MessageTimeline,
    pub world_map: WorldMap,
    pub lore: LoreTriggerTracker,

    /// Narrative-level static entries, always in prompt context.
    pub static_entries: Vec<StaticEntry>,

    pub journal: NavigationJournal,
}

impl NarrativeRecord {
    /// A fresh narrative: empty timeline, default world map, nothing triggered.
    pub fn new(narrative_id: NarrativeId, story_id: StoryId) -> Self {
        Self {
            narrative_id,
            story_id,
            revision: 0,
            timeline: MessageTimeline::new(narrative_id),
            world_map: WorldMap::new(),
            lore: LoreTriggerTracker::new(),
            static_entries: Vec::new(),
            journal: NavigationJournal::new(),
        }
    }

    pub fn with_static_entry(mut self, entry: StaticEntry) -> Self {
        self.static_entries.push(entry);
        self
    }
}

/// Durable storage for narrative records.
#[async_trait]
pub trait NarrativeStore: Send + Sync {
    /// Store a new record.
    async fn create(&self, record: NarrativeRecord) -> Result<(), StoreError>;

    async fn load(&self, id: NarrativeId) -> Result<NarrativeRecord, StoreError>;

    /// Replace the stored record if its revision still equals `record.revision`.
    /// Returns the new revision.
    async fn commit(&self, record: NarrativeRecord) -> Result<u64, StoreError>;

    /// Delete a narrative and everything it owns.
    async fn delete(&self, id: NarrativeId) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<NarrativeId>, StoreError>;
}

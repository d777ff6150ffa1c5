//! Top-level engine errors.

use thiserror::Error;
use world_rules::{Coords, DynamicEntryId, NarrativeId, NavigationError, StoryId};

use crate::config::ConfigError;
use crate::generation::GenerationError;
use crate::lore::{LoreError, TriggerError};
use crate::store::StoreError;
use crate::timeline::TimelineError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Lore(#[from] LoreError),

    #[error("invalid trigger expression: {0}")]
    InvalidTrigger(#[from] TriggerError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dynamic entry is not defined by this story: {0}")]
    UnknownEntry(DynamicEntryId),

    #[error("no location at {0}")]
    UnknownLocation(Coords),

    #[error("narrative not found: {0}")]
    UnknownNarrative(NarrativeId),

    #[error("narrative {narrative_id} belongs to story {expected}, not {found}")]
    StoryMismatch {
        narrative_id: NarrativeId,
        expected: StoryId,
        found: StoryId,
    },
}

impl EngineError {
    /// Check if the error is a cancelled AI call, which callers should not report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Generation(GenerationError::Cancelled))
    }
}

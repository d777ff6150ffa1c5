//! Stories - the shared, read-only templates narratives are started from.

use serde::{Deserialize, Serialize};
use world_rules::{Character, CharacterId, DynamicEntryId, StaticEntry, StoryId};

use crate::lore::{DynamicEntryDefinition, TriggerExpression, TriggerError};

/// A story: roster, dynamic entry definitions and opening static entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub roster: Vec<Character>,
    pub dynamic_entries: Vec<DynamicEntryDefinition>,

    /// Copied into every new narrative.
    pub static_entries: Vec<StaticEntry>,
}

impl Story {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: StoryId::new(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.roster.push(character);
        self
    }

    pub fn with_entry(mut self, entry: DynamicEntryDefinition) -> Self {
        self.dynamic_entries.push(entry);
        self
    }

    pub fn with_static_entry(mut self, entry: StaticEntry) -> Self {
        self.static_entries.push(entry);
        self
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.roster.iter().find(|c| c.id == id)
    }

    pub fn entry(&self, id: DynamicEntryId) -> Option<&DynamicEntryDefinition> {
        self.dynamic_entries.iter().find(|e| e.id == id)
    }

    /// The player's character, if the roster has one.
    pub fn user(&self) -> Option<&Character> {
        self.roster.iter().find(|c| c.is_user)
    }

    /// Parse every trigger expression, reporting the first invalid one.
    pub fn validate_triggers(&self) -> Result<(), TriggerError> {
        for entry in &self.dynamic_entries {
            TriggerExpression::parse(&entry.triggers)?;
        }
        Ok(())
    }
}

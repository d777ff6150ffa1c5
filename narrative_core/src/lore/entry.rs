//! Dynamic entry definitions and their per-narrative state.

use serde::{Deserialize, Serialize};
use world_rules::DynamicEntryId;

/// A story-scoped dynamic lore entry. Shared, read-only template for every narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntryDefinition {
    pub id: DynamicEntryId,
    pub title: String,

    /// Trigger expression, e.g. `"sword, blade AND cursed"`. See [`TriggerExpression`].
    ///
    /// [`TriggerExpression`]: super::TriggerExpression
    pub triggers: String,

    /// Content variants shown round-robin each time the entry is referenced.
    pub content_fields: Vec<String>,

    /// Default starting variant for narratives that trigger this entry.
    pub current_index: usize,
}

impl DynamicEntryDefinition {
    /// Create a definition with no content variants.
    pub fn new(title: impl Into<String>, triggers: impl Into<String>) -> Self {
        Self {
            id: DynamicEntryId::new(),
            title: title.into(),
            triggers: triggers.into(),
            content_fields: Vec::new(),
            current_index: 0,
        }
    }

    /// Append a content variant.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content_fields.push(content.into());
        self
    }

    /// Set the default starting variant.
    pub fn with_start_index(mut self, index: usize) -> Self {
        self.current_index = index;
        self
    }

    /// The default start index, wrapped into the variant list.
    pub fn start_index(&self) -> usize {
        match self.content_fields.len() {
            0 => 0,
            len => self.current_index % len,
        }
    }
}

/// Per-narrative state of a dynamic entry that has fired.
///
/// The cycling cursor is not stored directly: it is the start index advanced once per
/// recorded consumption, which lets the state be rolled back to any earlier turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeEntryState {
    pub definition_id: DynamicEntryId,
    pub triggered_at_turn: u64,
    pub start_index: usize,
    /// Turn of every content consumption, oldest first.
    pub consumed_at: Vec<u64>,

    /// Consumptions folded out of `consumed_at`; these can no longer be rolled back.
    #[serde(default)]
    pub sealed: usize,
}

impl NarrativeEntryState {
    /// State for an entry triggered on `turn`.
    pub fn triggered(definition: &DynamicEntryDefinition, turn: u64) -> Self {
        Self {
            definition_id: definition.id,
            triggered_at_turn: turn,
            start_index: definition.start_index(),
            consumed_at: Vec::new(),
            sealed: 0,
        }
    }

    /// Index of the variant the next consumption returns, for `variant_count` variants.
    pub fn current_index(&self, variant_count: usize) -> usize {
        if variant_count == 0 {
            0
        } else {
            (self.start_index + self.sealed + self.consumed_at.len()) % variant_count
        }
    }

    /// Forget consumptions recorded after `turn`.
    pub fn forget_after(&mut self, turn: u64) {
        self.consumed_at.retain(|t| *t <= turn);
    }

    /// Fold the consumption log into a plain count.
    pub fn seal(&mut self) {
        self.sealed += self.consumed_at.len();
        self.consumed_at.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_index_wraps() {
        let def = DynamicEntryDefinition::new("Sword", "sword")
            .with_content("A")
            .with_content("B")
            .with_start_index(5);
        assert_eq!(def.start_index(), 1);
        assert_eq!(DynamicEntryDefinition::new("Empty", "x").start_index(), 0);
    }

    #[test]
    fn test_state_index_cycles() {
        let def = DynamicEntryDefinition::new("Sword", "sword")
            .with_content("A")
            .with_content("B")
            .with_content("C")
            .with_start_index(2);
        let mut state = NarrativeEntryState::triggered(&def, 4);
        assert_eq!(state.current_index(3), 2);

        state.consumed_at.push(4);
        assert_eq!(state.current_index(3), 0);

        state.consumed_at.push(7);
        state.forget_after(5);
        assert_eq!(state.consumed_at, vec![4]);
        assert_eq!(state.current_index(3), 0);

        state.consumed_at.push(8);
        state.seal();
        assert!(state.consumed_at.is_empty());
        assert_eq!(state.current_index(3), 1);
        state.forget_after(0);
        assert_eq!(state.current_index(3), 1);
    }
}

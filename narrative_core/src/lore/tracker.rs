//! Lore Trigger Tracker - which dynamic entries a narrative has unlocked.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use world_rules::DynamicEntryId;

use super::{DynamicEntryDefinition, NarrativeEntryState, TriggerExpression};

/// Errors raised by lore bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoreError {
    #[error("dynamic entry has not been triggered in this narrative: {0}")]
    UnknownEntry(DynamicEntryId),

    #[error("dynamic entry has no content variants: {0}")]
    NoContent(DynamicEntryId),
}

/// Per-narrative trigger state for a story's dynamic entries.
///
/// Triggering is a pure function of the evaluated text and the definitions, and an entry
/// stays triggered once it fires, so replaying a message history rebuilds the same state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoreTriggerTracker {
    /// In trigger order.
    states: Vec<NarrativeEntryState>,
}

impl LoreTriggerTracker {
    /// Create a tracker with nothing triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every untriggered definition whose triggers match `text`.
    ///
    /// Returns the ids that fired on this call, in definition order. Entries that are
    /// already triggered are never fired again.
    pub fn evaluate(
        &mut self,
        text: &str,
        turn: u64,
        definitions: &[DynamicEntryDefinition],
    ) -> Vec<DynamicEntryId> {
        let mut fired = Vec::new();

        for definition in definitions {
            if self.is_triggered(definition.id) || !triggers_match(definition, text) {
                continue;
            }

            self.states
                .push(NarrativeEntryState::triggered(definition, turn));
            fired.push(definition.id);

            tracing::info!(
                entry_id = %definition.id,
                title = %definition.title,
                turn,
                "Dynamic entry triggered"
            );
        }

        fired
    }

    /// Triggered entries whose triggers match `text` again.
    pub fn matching_triggered(
        &self,
        text: &str,
        definitions: &[DynamicEntryDefinition],
    ) -> Vec<DynamicEntryId> {
        definitions
            .iter()
            .filter(|d| self.is_triggered(d.id) && triggers_match(d, text))
            .map(|d| d.id)
            .collect()
    }

    /// Return the entry's current content variant and advance its cursor.
    pub fn consume_content(
        &mut self,
        definition: &DynamicEntryDefinition,
        turn: u64,
    ) -> Result<String, LoreError> {
        let state = self
            .states
            .iter_mut()
            .find(|s| s.definition_id == definition.id)
            .ok_or(LoreError::UnknownEntry(definition.id))?;

        let index = state.current_index(definition.content_fields.len());
        let content = definition
            .content_fields
            .get(index)
            .cloned()
            .ok_or(LoreError::NoContent(definition.id))?;

        state.consumed_at.push(turn);
        Ok(content)
    }

    /// Undo everything that happened after `turn`: entries triggered later are
    /// un-triggered and later consumptions are forgotten. Returns the number of entries
    /// that were un-triggered.
    pub fn rollback_after(&mut self, turn: u64) -> usize {
        let before = self.states.len();
        self.states.retain(|s| s.triggered_at_turn <= turn);
        for state in &mut self.states {
            state.forget_after(turn);
        }
        before - self.states.len()
    }

    /// Make every past consumption permanent, dropping its per-turn log.
    pub fn seal_history(&mut self) {
        for state in &mut self.states {
            state.seal();
        }
    }

    pub fn is_triggered(&self, id: DynamicEntryId) -> bool {
        self.states.iter().any(|s| s.definition_id == id)
    }

    pub fn state(&self, id: DynamicEntryId) -> Option<&NarrativeEntryState> {
        self.states.iter().find(|s| s.definition_id == id)
    }

    /// All triggered entries, in trigger order.
    pub fn triggered(&self) -> impl Iterator<Item = &NarrativeEntryState> {
        self.states.iter()
    }

    pub fn triggered_count(&self) -> usize {
        self.states.len()
    }
}

fn triggers_match(definition: &DynamicEntryDefinition, text: &str) -> bool {
    match TriggerExpression::parse(&definition.triggers) {
        Ok(expression) => expression.is_match(text),
        Err(e) => {
            tracing::warn!(
                entry_id = %definition.id,
                error = %e,
                "Skipping dynamic entry with invalid triggers"
            );
            false
        }
    }
}

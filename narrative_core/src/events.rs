//! Narrative events - what a turn changed, reported back to callers.

use serde::{Deserialize, Serialize};
use world_rules::{CharacterId, Coords, DynamicEntryId, MessageId};

/// Something that happened while the engine processed a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NarrativeEvent {
    /// A message was added to the timeline.
    MessageAppended {
        message_id: MessageId,
        sort_order: u64,
        character_id: Option<CharacterId>,
    },

    /// A dynamic entry fired for the first time.
    EntryTriggered { entry_id: DynamicEntryId, turn: u64 },

    /// A content variant of a triggered entry entered the prompt.
    LoreRevealed {
        entry_id: DynamicEntryId,
        content: String,
    },

    /// Travel moved one cell.
    StepTaken { at: Coords },

    /// Travel reached its destination.
    Arrived { at: Coords, name: String },

    /// The timeline was cut back.
    Rewound {
        after_sort_order: u64,
        removed: usize,
    },
}

impl NarrativeEvent {
    /// Check if this event moved the narrative on the map.
    pub fn is_movement(&self) -> bool {
        matches!(
            self,
            NarrativeEvent::StepTaken { .. } | NarrativeEvent::Arrived { .. }
        )
    }

    pub fn is_arrival(&self) -> bool {
        matches!(self, NarrativeEvent::Arrived { .. })
    }
}

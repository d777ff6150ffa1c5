//! Character definitions.

use serde::{Deserialize, Serialize};

use super::CharacterId;

/// A member of a story's roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub short_description: String,

    /// The human player's character. Never picked by turn dispatch.
    pub is_user: bool,

    /// Narrators describe the scene rather than act in it.
    pub is_narrator: bool,

    /// Inactive characters stay on the roster but do not take turns.
    pub is_active: bool,
}

impl Character {
    /// Create a new active, AI-controlled character with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            short_description: String::new(),
            is_user: false,
            is_narrator: false,
            is_active: true,
        }
    }

    /// Set the short description shown to the AI.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.short_description = description.into();
        self
    }

    /// Mark this character as the user's.
    pub fn as_user(mut self) -> Self {
        self.is_user = true;
        self
    }

    /// Mark this character as a narrator.
    pub fn as_narrator(mut self) -> Self {
        self.is_narrator = true;
        self
    }

    /// Set whether the character takes turns.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Check if this character can be chosen to speak by the dispatcher.
    pub fn can_take_turn(&self) -> bool {
        self.is_active && !self.is_user
    }
}

//! Context Assembler - Builds the prompt for the next AI-written message.
//!
//! The prompt is assembled from what the narrative currently knows:
//! 1. **Background**: narrative-level static entries
//! 2. **Place**: the current location, its local entries and named neighbours
//! 3. **Lore**: dynamic entry content revealed on this turn
//! 4. **Cast**: the active roster
//! 5. **History**: the most recent visible messages
//! 6. **Instruction**: who speaks next

use serde::{Deserialize, Serialize};
use world_rules::{Character, CharacterId, Location};

use crate::store::NarrativeRecord;
use crate::timeline::{Message, MessageType};

/// Configuration for prompt assembly.
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// Maximum number of recent messages to include.
    pub max_messages: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self { max_messages: 30 }
    }
}

/// Dynamic entry content that entered the prompt on this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedLore {
    pub title: String,
    pub content: String,
}

/// The context assembler builds prompts from narrative state.
pub struct ContextAssembler {
    config: AssemblyConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(AssemblyConfig::default())
    }

    /// Assemble the context for `speaker`'s next message.
    pub fn assemble(
        &self,
        record: &NarrativeRecord,
        roster: &[Character],
        revealed: &[RevealedLore],
        speaker: &Character,
    ) -> AssembledContext {
        let map = &record.world_map;
        let location = map.current_location().map(LocationContext::from_location);

        let nearby = map
            .neighbourhood(map.current())
            .into_iter()
            .filter(|l| l.coords != map.current())
            .map(Location::display_name)
            .collect();

        let travel = map.destination().map(|goal| {
            let name = map
                .location_at(goal)
                .map(Location::display_name)
                .unwrap_or_else(|| goal.to_string());
            format!("Travelling to {name}, {} steps remaining", map.path_len())
        });

        AssembledContext {
            background: record
                .static_entries
                .iter()
                .map(|e| format!("{}: {}", e.title, e.content))
                .collect(),
            location,
            nearby,
            travel,
            revealed_lore: revealed
                .iter()
                .map(|l| format!("{}: {}", l.title, l.content))
                .collect(),
            characters: roster
                .iter()
                .filter(|c| c.is_active)
                .map(|c| CharacterContext {
                    name: c.name.clone(),
                    description: c.short_description.clone(),
                    is_user: c.is_user,
                    is_narrator: c.is_narrator,
                })
                .collect(),
            history: record
                .timeline
                .recent_visible(self.config.max_messages)
                .into_iter()
                .map(|m| describe_message(m, roster))
                .collect(),
            speaker: speaker.name.clone(),
            speaker_is_narrator: speaker.is_narrator,
        }
    }
}

fn speaker_name(id: Option<CharacterId>, roster: &[Character]) -> &str {
    id.and_then(|id| roster.iter().find(|c| c.id == id))
        .map(|c| c.name.as_str())
        .unwrap_or("Unknown")
}

fn describe_message(message: &Message, roster: &[Character]) -> String {
    match message.message_type {
        MessageType::Chat => format!(
            "{}: {}",
            speaker_name(message.character_id, roster),
            message.content
        ),
        MessageType::System => format!("[System] {}", message.content),
        MessageType::Event => format!("[Event] {}", message.content),
    }
}

/// The assembled context ready for prompt generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Narrative static entries, as `title: content`.
    pub background: Vec<String>,

    pub location: Option<LocationContext>,

    /// Named locations around the current one.
    pub nearby: Vec<String>,

    /// In-flight travel, if any.
    pub travel: Option<String>,

    pub revealed_lore: Vec<String>,

    pub characters: Vec<CharacterContext>,

    /// Recent messages, oldest first.
    pub history: Vec<String>,

    pub speaker: String,
    pub speaker_is_narrator: bool,
}

impl AssembledContext {
    /// Format the context as a prompt string.
    pub fn to_prompt_string(&self) -> String {
        let mut prompt = String::new();

        if !self.background.is_empty() {
            prompt.push_str("## Story Background\n");
            for entry in &self.background {
                prompt.push_str(&format!("- {}\n", entry));
            }
            prompt.push('\n');
        }

        if let Some(location) = &self.location {
            prompt.push_str("## Current Location\n");
            prompt.push_str(&location.name);
            if !location.description.is_empty() {
                prompt.push_str(&format!(": {}", location.description));
            }
            prompt.push('\n');
            for entry in &location.entries {
                prompt.push_str(&format!("- {}\n", entry));
            }
            if let Some(travel) = &self.travel {
                prompt.push_str(&format!("{}\n", travel));
            }
            if !self.nearby.is_empty() {
                prompt.push_str(&format!("Nearby: {}\n", self.nearby.join(", ")));
            }
            prompt.push('\n');
        }

        if !self.revealed_lore.is_empty() {
            prompt.push_str("## Relevant Lore\n");
            for lore in &self.revealed_lore {
                prompt.push_str(&format!("- {}\n", lore));
            }
            prompt.push('\n');
        }

        if !self.characters.is_empty() {
            prompt.push_str("## Characters\n");
            for character in &self.characters {
                let role = if character.is_user {
                    " (player)"
                } else if character.is_narrator {
                    " (narrator)"
                } else {
                    ""
                };
                prompt.push_str(&format!("- {}{}", character.name, role));
                if !character.description.is_empty() {
                    prompt.push_str(&format!(": {}", character.description));
                }
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if !self.history.is_empty() {
            prompt.push_str("## Recent Events\n");
            for line in &self.history {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("## Instruction\n");
        if self.speaker_is_narrator {
            prompt.push_str(&format!(
                "Write the next message as {}, describing the scene and what happens next.\n",
                self.speaker
            ));
        } else {
            prompt.push_str(&format!(
                "Write the next message as {}. Stay in character and reply only with what {} says or does.\n",
                self.speaker, self.speaker
            ));
        }

        prompt
    }
}

/// Location context for LLM prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationContext {
    pub name: String,
    pub description: String,
    pub entries: Vec<String>,
}

impl LocationContext {
    fn from_location(location: &Location) -> Self {
        Self {
            name: location.display_name(),
            description: location.description.clone(),
            entries: location
                .local_static_entries
                .iter()
                .map(|e| format!("{}: {}", e.title, e.content))
                .collect(),
        }
    }
}

/// Character context for LLM prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterContext {
    pub name: String,
    pub description: String,
    pub is_user: bool,
    pub is_narrator: bool,
}

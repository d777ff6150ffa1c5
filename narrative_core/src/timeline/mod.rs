//! Message Timeline - the ordered, editable message history of one narrative.
//!
//! Every message carries a `sort_order` that is unique within the narrative and strictly
//! increasing in creation order. Gaps are allowed (individual deletes leave them), but two
//! live messages never share a value. A value freed by deleting the newest message is not
//! handed out again; only rewinding makes the next append continue right after the rewind
//! point.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use world_rules::{CharacterId, MessageId, NarrativeId};

/// Errors raised by timeline edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("message not found: {0}")]
    UnknownMessage(MessageId),
}

/// What kind of entry a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Spoken by a character.
    #[default]
    Chat,
    /// Out-of-story notices such as "You have moved to ...".
    System,
    /// Story events injected by the engine.
    Event,
}

/// Emotion tag used to pick character art.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    #[default]
    Neutral,
}

impl Emotion {
    /// Parse a loosely formatted emotion, falling back to neutral.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            "surprised" => Emotion::Surprised,
            _ => Emotion::Neutral,
        }
    }
}

/// A message on a narrative timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub narrative_id: NarrativeId,
    /// `None` for system and event messages.
    pub character_id: Option<CharacterId>,
    pub content: String,
    pub message_type: MessageType,
    pub emotion: Option<Emotion>,
    pub sort_order: u64,
    /// Unread by the user.
    pub is_new: bool,
    /// Kept on the timeline but excluded from AI context.
    pub is_hidden: bool,
}

impl Message {
    pub fn is_chat(&self) -> bool {
        self.message_type == MessageType::Chat
    }
}

/// A message that has not been placed on a timeline yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub character_id: Option<CharacterId>,
    pub content: String,
    pub message_type: MessageType,
    pub emotion: Option<Emotion>,
    pub is_hidden: bool,
}

impl NewMessage {
    /// A chat line spoken by a character.
    pub fn chat(character_id: CharacterId, content: impl Into<String>) -> Self {
        Self {
            character_id: Some(character_id),
            content: content.into(),
            message_type: MessageType::Chat,
            emotion: None,
            is_hidden: false,
        }
    }

    /// A system notice.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            character_id: None,
            content: content.into(),
            message_type: MessageType::System,
            emotion: None,
            is_hidden: false,
        }
    }

    /// A story event.
    pub fn event(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Event,
            ..Self::system(content)
        }
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }
}

/// In-place update for an existing message. `sort_order` can never be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub emotion: Option<Emotion>,
    pub is_hidden: Option<bool>,
    pub is_new: Option<bool>,
}

/// The ordered message history of one narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTimeline {
    narrative_id: NarrativeId,
    messages: Vec<Message>,

    /// Lowest `sort_order` the next append may use.
    #[serde(default)]
    next_order: u64,
}

impl MessageTimeline {
    /// Create an empty timeline.
    pub fn new(narrative_id: NarrativeId) -> Self {
        Self {
            narrative_id,
            messages: Vec::new(),
            next_order: 0,
        }
    }

    pub fn narrative_id(&self) -> NarrativeId {
        self.narrative_id
    }

    /// The `sort_order` the next appended message will receive.
    pub fn next_sort_order(&self) -> u64 {
        let after_last = self.messages.last().map(|m| m.sort_order + 1).unwrap_or(0);
        after_last.max(self.next_order)
    }

    /// Append a message, assigning it the next `sort_order`.
    pub fn append(&mut self, message: NewMessage) -> &Message {
        let sort_order = self.next_sort_order();
        self.next_order = sort_order + 1;
        self.messages.push(Message {
            id: MessageId::new(),
            narrative_id: self.narrative_id,
            character_id: message.character_id,
            content: message.content,
            message_type: message.message_type,
            emotion: message.emotion,
            sort_order,
            is_new: true,
            is_hidden: message.is_hidden,
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Update a message in place.
    pub fn edit(&mut self, id: MessageId, patch: MessagePatch) -> Result<&Message, TimelineError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(TimelineError::UnknownMessage(id))?;

        if let Some(content) = patch.content {
            message.content = content;
        }
        if let Some(emotion) = patch.emotion {
            message.emotion = Some(emotion);
        }
        if let Some(hidden) = patch.is_hidden {
            message.is_hidden = hidden;
        }
        if let Some(is_new) = patch.is_new {
            message.is_new = is_new;
        }

        Ok(message)
    }

    /// Delete a single message. Later messages keep their `sort_order`.
    pub fn delete(&mut self, id: MessageId) -> Result<Message, TimelineError> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or(TimelineError::UnknownMessage(id))?;
        Ok(self.messages.remove(index))
    }

    /// Delete every message with `sort_order > after`. Returns how many were removed.
    pub fn rewind(&mut self, after: u64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.sort_order <= after);
        self.next_order = self.next_order.min(after.saturating_add(1));
        before - self.messages.len()
    }

    /// Mark every message as read.
    pub fn mark_all_read(&mut self) {
        for message in &mut self.messages {
            message.is_new = false;
        }
    }

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_new).count()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent chat message, if any.
    pub fn last_chat(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_chat())
    }

    /// The last `count` messages that are not hidden from AI context, oldest first.
    pub fn recent_visible(&self, count: usize) -> Vec<&Message> {
        let mut recent: Vec<_> = self
            .messages
            .iter()
            .rev()
            .filter(|m| !m.is_hidden)
            .take(count)
            .collect();
        recent.reverse();
        recent
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline_with(count: usize) -> MessageTimeline {
        let mut timeline = MessageTimeline::new(NarrativeId::new());
        let speaker = CharacterId::new();
        for i in 0..count {
            timeline.append(NewMessage::chat(speaker, format!("line {i}")));
        }
        timeline
    }

    #[test]
    fn test_append_assigns_increasing_sort_order() {
        let timeline = timeline_with(4);
        let orders: Vec<_> = timeline.iter().map(|m| m.sort_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert!(timeline.iter().all(|m| m.is_new));
    }

    #[test]
    fn test_rewind_keeps_prefix_and_continues_numbering() {
        let mut timeline = timeline_with(10);

        let removed = timeline.rewind(5);

        assert_eq!(removed, 4);
        assert_eq!(timeline.len(), 6);
        assert_eq!(
            timeline.iter().map(|m| m.sort_order).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        let next = timeline.append(NewMessage::system("after rewind"));
        assert_eq!(next.sort_order, 6);
    }

    #[test]
    fn test_rewind_past_end_is_noop() {
        let mut timeline = timeline_with(3);
        assert_eq!(timeline.rewind(10), 0);
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn test_edit_does_not_move_message() {
        let mut timeline = timeline_with(3);
        let id = timeline.iter().nth(1).unwrap().id;

        let edited = timeline
            .edit(
                id,
                MessagePatch {
                    content: Some("rewritten".to_string()),
                    emotion: Some(Emotion::Angry),
                    is_hidden: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(edited.sort_order, 1);
        assert_eq!(edited.content, "rewritten");
        assert_eq!(edited.emotion, Some(Emotion::Angry));
        assert!(edited.is_hidden);
    }

    #[test]
    fn test_edit_unknown_message() {
        let mut timeline = timeline_with(1);
        let missing = MessageId::new();
        assert_eq!(
            timeline.edit(missing, MessagePatch::default()).unwrap_err(),
            TimelineError::UnknownMessage(missing)
        );
    }

    #[test]
    fn test_delete_leaves_gap_but_keeps_order_unique() {
        let mut timeline = timeline_with(3);
        let last_id = timeline.last().unwrap().id;
        let middle = timeline.iter().nth(1).unwrap().id;

        timeline.delete(middle).unwrap();
        assert_eq!(timeline.next_sort_order(), 3);

        timeline.delete(last_id).unwrap();
        // Turn state may already be stamped with the freed value.
        assert_eq!(timeline.next_sort_order(), 3);
        assert_eq!(timeline.append(NewMessage::system("x")).sort_order, 3);

        timeline.rewind(0);
        assert_eq!(timeline.append(NewMessage::system("y")).sort_order, 1);
    }

    #[test]
    fn test_rewind_past_end_keeps_numbering() {
        let mut timeline = timeline_with(3);
        let last_id = timeline.last().unwrap().id;
        timeline.delete(last_id).unwrap();

        timeline.rewind(10);

        assert_eq!(timeline.next_sort_order(), 3);
    }

    #[test]
    fn test_timeline_without_next_order_field_deserializes() {
        let timeline = timeline_with(2);
        let mut json = serde_json::to_value(&timeline).unwrap();
        json.as_object_mut().unwrap().remove("next_order");

        let back: MessageTimeline = serde_json::from_value(json).unwrap();
        assert_eq!(back.next_sort_order(), 2);
    }

    #[test]
    fn test_mark_all_read_is_idempotent() {
        let mut timeline = timeline_with(3);
        assert_eq!(timeline.unread_count(), 3);

        timeline.mark_all_read();
        timeline.mark_all_read();

        assert_eq!(timeline.unread_count(), 0);
        timeline.append(NewMessage::system("new"));
        assert_eq!(timeline.unread_count(), 1);
    }

    #[test]
    fn test_recent_visible_skips_hidden() {
        let mut timeline = timeline_with(2);
        timeline.append(NewMessage::event("secret").hidden());
        timeline.append(NewMessage::system("shown"));

        let recent: Vec<_> = timeline
            .recent_visible(2)
            .into_iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(recent, vec!["line 1", "shown"]);
        assert_eq!(timeline.last_chat().unwrap().content, "line 1");
    }

    #[test]
    fn test_emotion_parse() {
        assert_eq!(Emotion::parse(" Happy "), Emotion::Happy);
        assert_eq!(Emotion::parse("bewildered"), Emotion::Neutral);
    }
}

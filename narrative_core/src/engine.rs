//! The narrative engine - one writer per narrative, one turn at a time.
//!
//! Every mutating operation takes the narrative's lock, loads its record, changes it and
//! commits it back as a single write. A full turn ([`NarrativeEngine::take_turn`]) commits
//! twice: once with the user's message and everything derived from it, and once with the
//! AI reply. A cancelled or failed reply leaves the first commit in place and appends
//! nothing.
//!
//! Navigation and lore changes are stamped with the `sort_order` of the message that
//! caused them, so a rewind to any message restores exactly the state that message saw.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use world_rules::{
    Character, CharacterId, Coords, DynamicEntryId, Location, LocationPatch, MessageId,
    NarrativeId, NavigationSnapshot, StaticEntry, TravelEvent, TravelPlan, WorldMap,
};

use crate::analysis::{
    analysis_prompt, location_candidates, parse_analysis, resolve_move, TurnAnalysis,
};

use crate::config::{EngineConfig, RewindPolicy};
use crate::context_assembler::{AssemblyConfig, ContextAssembler, RevealedLore};
use crate::dispatch::{CharacterTurnCandidate, TurnDispatcher};
use crate::error::EngineError;
use crate::events::NarrativeEvent;
use crate::generation::{generate_cancellable, GenerationError, GenerationRequest, TextGenerator};
use crate::lore::{DynamicEntryDefinition, LoreError};
use crate::store::{NarrativeRecord, NarrativeStore, StoreError};
use crate::story::Story;
use crate::timeline::{Message, MessagePatch, NewMessage};

/// What a completed turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub user_message: Message,

    /// The character picked to answer. `None` when nobody can take a turn.
    pub speaker: Option<CharacterId>,

    pub reply: Option<Message>,

    /// Everything that changed, in order.
    pub events: Vec<NarrativeEvent>,
}

/// Runs narratives on top of a store and a text generator.
pub struct NarrativeEngine<S, G> {
    store: S,
    generator: G,
    config: EngineConfig,
    assembler: ContextAssembler,
    dispatcher: std::sync::Mutex<TurnDispatcher>,
    locks: DashMap<NarrativeId, Arc<Mutex<()>>>,
}

impl<S, G> NarrativeEngine<S, G>
where
    S: NarrativeStore,
    G: TextGenerator,
{
    pub fn new(store: S, generator: G, config: EngineConfig) -> Self {
        let dispatcher = match config.dispatch_seed {
            Some(seed) => TurnDispatcher::seeded(seed),
            None => TurnDispatcher::from_entropy(),
        };
        let assembler = ContextAssembler::new(AssemblyConfig {
            max_messages: config.context_messages,
        });

        Self {
            store,
            generator,
            config,
            assembler,
            dispatcher: std::sync::Mutex::new(dispatcher),
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------
    // Narrative lifecycle
    // ------------------------------------------------------------------

    /// Start a new narrative of `story`.
    pub async fn create_narrative(&self, story: &Story) -> Result<NarrativeId, EngineError> {
        story.validate_triggers()?;

        let id = NarrativeId::new();
        let mut record = NarrativeRecord::new(id, story.id);
        record.static_entries = story.static_entries.clone();
        self.store.create(record).await?;

        tracing::info!(narrative_id = %id, story_id = %story.id, "Narrative created");
        Ok(id)
    }

    /// Delete a narrative with its messages, world map and lore state.
    pub async fn delete_narrative(&self, id: NarrativeId) -> Result<(), EngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.store
            .delete(id)
            .await
            .map_err(|e| self.store_error(e, id))?;
        self.locks.remove(&id);

        tracing::info!(narrative_id = %id, "Narrative deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Travel
    // ------------------------------------------------------------------

    /// Plan travel from the current position to `destination`.
    pub async fn plan_travel(
        &self,
        id: NarrativeId,
        destination: Coords,
    ) -> Result<TravelPlan, EngineError> {
        self.update(id, |record| {
            let turn = record.timeline.next_sort_order();
            record.journal.record(turn, &record.world_map);
            Ok(record.world_map.set_destination(destination)?)
        })
        .await
    }

    /// Move one step along in-flight travel outside of a turn.
    pub async fn step_travel(&self, id: NarrativeId) -> Result<Vec<NarrativeEvent>, EngineError> {
        self.update(id, |record| {
            let turn = record.timeline.next_sort_order();
            let mut events = Vec::new();
            advance_travel(record, turn, &mut events);
            Ok(events)
        })
        .await
    }

    /// Abandon in-flight travel.
    pub async fn cancel_travel(&self, id: NarrativeId) -> Result<(), EngineError> {
        self.update(id, |record| {
            if record.world_map.is_travelling() {
                let turn = record.timeline.next_sort_order();
                record.journal.record(turn, &record.world_map);
                record.world_map.cancel_travel();
            }
            Ok(())
        })
        .await
    }

    pub async fn world_map(&self, id: NarrativeId) -> Result<WorldMap, EngineError> {
        Ok(self.load(id).await?.world_map)
    }

    /// Fill in generated content for a location.
    pub async fn update_location(
        &self,
        id: NarrativeId,
        coords: Coords,
        patch: LocationPatch,
    ) -> Result<Location, EngineError> {
        self.update(id, |record| {
            let location = record
                .world_map
                .location_at_mut(coords)
                .ok_or(EngineError::UnknownLocation(coords))?;
            location.apply(patch);
            Ok(location.clone())
        })
        .await
    }

    /// Attach a static entry to a location.
    pub async fn add_location_entry(
        &self,
        id: NarrativeId,
        coords: Coords,
        entry: StaticEntry,
    ) -> Result<(), EngineError> {
        self.update(id, |record| {
            let location = record
                .world_map
                .location_at_mut(coords)
                .ok_or(EngineError::UnknownLocation(coords))?;
            location.local_static_entries.push(entry);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Lore
    // ------------------------------------------------------------------

    /// Fire every untriggered definition matching `text` on `turn`.
    pub async fn evaluate_triggers(
        &self,
        id: NarrativeId,
        text: &str,
        turn: u64,
        definitions: &[DynamicEntryDefinition],
    ) -> Result<Vec<DynamicEntryId>, EngineError> {
        self.update(id, |record| Ok(record.lore.evaluate(text, turn, definitions)))
            .await
    }

    /// Take the next content variant of a triggered entry.
    pub async fn consume_lore(
        &self,
        id: NarrativeId,
        story: &Story,
        entry_id: DynamicEntryId,
    ) -> Result<String, EngineError> {
        let definition = story
            .entry(entry_id)
            .ok_or(EngineError::UnknownEntry(entry_id))?;
        self.update(id, |record| {
            check_story(record, story)?;
            let turn = record.timeline.next_sort_order();
            Ok(record.lore.consume_content(definition, turn)?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Weighted choice among explicit candidates.
    pub fn choose_speaker(&self, candidates: &[CharacterTurnCandidate]) -> Option<CharacterId> {
        let ids: Vec<CharacterId> = candidates.iter().map(|c| c.character_id).collect();
        let weights: Vec<f64> = candidates.iter().map(|c| c.weight).collect();
        self.dispatcher().choose_next(&ids, &weights).copied()
    }

    /// Pick who should speak next in a narrative, from its recent history.
    pub async fn next_speaker(
        &self,
        id: NarrativeId,
        roster: &[Character],
    ) -> Result<Option<CharacterId>, EngineError> {
        let record = self.load(id).await?;
        let recent = record.timeline.recent_visible(self.config.speaker_window);
        Ok(self
            .dispatcher()
            .next_speaker(roster, &recent, false, &self.config.scoring()))
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn messages(&self, id: NarrativeId) -> Result<Vec<Message>, EngineError> {
        Ok(self.load(id).await?.timeline.iter().cloned().collect())
    }

    pub async fn append_message(
        &self,
        id: NarrativeId,
        message: NewMessage,
    ) -> Result<Message, EngineError> {
        self.update(id, |record| Ok(record.timeline.append(message).clone()))
            .await
    }

    pub async fn edit_message(
        &self,
        id: NarrativeId,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> Result<Message, EngineError> {
        self.update(id, |record| Ok(record.timeline.edit(message_id, patch)?.clone()))
            .await
    }

    pub async fn delete_message(
        &self,
        id: NarrativeId,
        message_id: MessageId,
    ) -> Result<Message, EngineError> {
        self.update(id, |record| Ok(record.timeline.delete(message_id)?))
            .await
    }

    /// Remove every message after `after_sort_order`, applying the configured
    /// [`RewindPolicy`] to lore and navigation in the same write.
    pub async fn rewind(
        &self,
        id: NarrativeId,
        after_sort_order: u64,
    ) -> Result<NarrativeEvent, EngineError> {
        let policy = self.config.rewind_policy;
        let event = self
            .update(id, |record| {
                let removed = record.timeline.rewind(after_sort_order);
                if policy == RewindPolicy::RollBackDerivedState {
                    record.lore.rollback_after(after_sort_order);
                    record
                        .journal
                        .rollback_after(after_sort_order, &mut record.world_map);
                }
                Ok(NarrativeEvent::Rewound {
                    after_sort_order,
                    removed,
                })
            })
            .await?;

        tracing::info!(narrative_id = %id, after_sort_order, ?policy, "Timeline rewound");
        Ok(event)
    }

    /// Mark every message as read.
    pub async fn mark_read(&self, id: NarrativeId) -> Result<(), EngineError> {
        self.update(id, |record| {
            record.timeline.mark_all_read();
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Run a full turn: record the user's message, reveal lore, advance travel, pick a
    /// speaker and append the AI reply.
    ///
    /// When analysis is enabled the reply is tagged with an emotion, and a move the user's
    /// text names to the current or an adjacent location is carried out after the reply.
    ///
    /// If `cancel` fires before the reply is appended, the turn ends with
    /// [`GenerationError::Cancelled`] and no reply is appended.
    pub async fn take_turn(
        &self,
        id: NarrativeId,
        story: &Story,
        user: CharacterId,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load(id).await?;
        check_story(&record, story)?;
        let mut events = Vec::new();

        let user_message = record
            .timeline
            .append(NewMessage::chat(user, content))
            .clone();
        let turn = user_message.sort_order;
        events.push(message_appended(&user_message));

        let revealed = reveal_lore(&mut record, &story.dynamic_entries, content, turn, &mut events)?;
        let arrived = advance_travel(&mut record, turn, &mut events);

        self.settle(&mut record);
        record.revision = self.store.commit(record.clone()).await?;

        tracing::info!(
            narrative_id = %id,
            turn,
            revealed = revealed.len(),
            arrived,
            "User turn recorded"
        );

        let speaker_id = {
            let recent = record.timeline.recent_visible(self.config.speaker_window);
            self.dispatcher()
                .next_speaker(&story.roster, &recent, arrived, &self.config.scoring())
        };
        let Some(speaker) = speaker_id.and_then(|s| story.character(s)) else {
            tracing::info!(narrative_id = %id, "No character can take a turn");
            return Ok(TurnOutcome {
                user_message,
                speaker: None,
                reply: None,
                events,
            });
        };

        let prompt = self
            .assembler
            .assemble(&record, &story.roster, &revealed, speaker)
            .to_prompt_string();

        let request = GenerationRequest::text(prompt);
        let candidates = location_candidates(&record.world_map);
        let analysed = async {
            let reply = generate_cancellable(&self.generator, request, cancel).await?;
            let user_analysis = self.analyze(id, content, &candidates, cancel).await?;
            let reply_analysis = self.analyze(id, &reply, &candidates, cancel).await?;
            Ok::<_, GenerationError>((reply, user_analysis, reply_analysis))
        };
        let (reply, user_analysis, reply_analysis) = match analysed.await {
            Ok(done) => done,
            Err(GenerationError::Cancelled) => {
                tracing::info!(narrative_id = %id, speaker = %speaker.name, "Reply cancelled");
                return Err(GenerationError::Cancelled.into());
            }
            Err(e) => {
                tracing::error!(narrative_id = %id, speaker = %speaker.name, error = %e, "Reply generation failed");
                return Err(e.into());
            }
        };

        let mut new_reply = NewMessage::chat(speaker.id, reply.trim());
        if let Some(analysis) = reply_analysis {
            new_reply = new_reply.with_emotion(analysis.emotion);
        }
        let reply = record.timeline.append(new_reply).clone();
        events.push(message_appended(&reply));

        let destination = user_analysis
            .as_ref()
            .and_then(|analysis| resolve_move(&record.world_map, analysis, &candidates))
            .map(|location| location.coords);
        if let Some(destination) = destination {
            move_to(&mut record, destination, &mut events);
        }

        self.settle(&mut record);
        self.store.commit(record).await?;

        tracing::info!(
            narrative_id = %id,
            speaker = %speaker.name,
            sort_order = reply.sort_order,
            "Reply appended"
        );

        Ok(TurnOutcome {
            user_message,
            speaker: Some(speaker.id),
            reply: Some(reply),
            events,
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Classify `text`. `None` when analysis is disabled; any failure other than
    /// cancellation falls back to a neutral reading.
    async fn analyze(
        &self,
        id: NarrativeId,
        text: &str,
        candidates: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<TurnAnalysis>, GenerationError> {
        if !self.config.analysis_enabled {
            return Ok(None);
        }

        let request = GenerationRequest::json(analysis_prompt(text, candidates));
        let analysis = generate_cancellable(&self.generator, request, cancel)
            .await
            .and_then(|reply| parse_analysis(&reply));
        match analysis {
            Ok(analysis) => Ok(Some(analysis)),
            Err(GenerationError::Cancelled) => Err(GenerationError::Cancelled),
            Err(e) => {
                tracing::warn!(narrative_id = %id, error = %e, "Turn analysis failed, using neutral");
                Ok(Some(TurnAnalysis::default()))
            }
        }
    }

    /// Drop undo history the rewind policy will never use.
    fn settle(&self, record: &mut NarrativeRecord) {
        if self.config.rewind_policy == RewindPolicy::KeepDerivedState {
            record.journal.clear();
            record.lore.seal_history();
        }
    }

    fn lock_for(&self, id: NarrativeId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Map a store error, forgetting the lock of a narrative that does not exist.
    fn store_error(&self, error: StoreError, id: NarrativeId) -> EngineError {
        match error {
            StoreError::NotFound(_) => {
                self.locks.remove(&id);
                EngineError::UnknownNarrative(id)
            }
            other => other.into(),
        }
    }

    fn dispatcher(&self) -> MutexGuard<'_, TurnDispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self, id: NarrativeId) -> Result<NarrativeRecord, EngineError> {
        self.store.load(id).await.map_err(|e| self.store_error(e, id))
    }

    /// Load, change and commit a record under the narrative's lock.
    async fn update<T, F>(&self, id: NarrativeId, change: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut NarrativeRecord) -> Result<T, EngineError> + Send,
        T: Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load(id).await?;
        let value = change(&mut record)?;
        self.settle(&mut record);
        self.store.commit(record).await?;
        Ok(value)
    }
}

fn check_story(record: &NarrativeRecord, story: &Story) -> Result<(), EngineError> {
    if record.story_id == story.id {
        Ok(())
    } else {
        Err(EngineError::StoryMismatch {
            narrative_id: record.narrative_id,
            expected: record.story_id,
            found: story.id,
        })
    }
}

fn message_appended(message: &Message) -> NarrativeEvent {
    NarrativeEvent::MessageAppended {
        message_id: message.id,
        sort_order: message.sort_order,
        character_id: message.character_id,
    }
}

/// Fire new triggers and take a content variant of every entry `text` references.
fn reveal_lore(
    record: &mut NarrativeRecord,
    definitions: &[DynamicEntryDefinition],
    text: &str,
    turn: u64,
    events: &mut Vec<NarrativeEvent>,
) -> Result<Vec<RevealedLore>, EngineError> {
    for entry_id in record.lore.evaluate(text, turn, definitions) {
        events.push(NarrativeEvent::EntryTriggered { entry_id, turn });
    }

    let mut revealed = Vec::new();
    for entry_id in record.lore.matching_triggered(text, definitions) {
        let Some(definition) = definitions.iter().find(|d| d.id == entry_id) else {
            continue;
        };
        match record.lore.consume_content(definition, turn) {
            Ok(content) => {
                events.push(NarrativeEvent::LoreRevealed {
                    entry_id,
                    content: content.clone(),
                });
                revealed.push(RevealedLore {
                    title: definition.title.clone(),
                    content,
                });
            }
            Err(LoreError::NoContent(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(revealed)
}

/// Take one step of in-flight travel. Returns true on arrival.
fn advance_travel(record: &mut NarrativeRecord, turn: u64, events: &mut Vec<NarrativeEvent>) -> bool {
    if !record.world_map.is_travelling() {
        return false;
    }

    let before = record.world_map.navigation_snapshot();
    match record.world_map.advance_one_step() {
        Some(TravelEvent::StepTaken(at)) => {
            record.journal.record_snapshot(turn, before);
            events.push(NarrativeEvent::StepTaken { at });
            false
        }
        Some(TravelEvent::Arrived(at)) => {
            announce_arrival(record, at, before, events);
            true
        }
        None => false,
    }
}

/// Jump straight to `to`, as when the user's text walks into a neighbouring location.
fn move_to(record: &mut NarrativeRecord, to: Coords, events: &mut Vec<NarrativeEvent>) {
    let before = record.world_map.navigation_snapshot();
    if let Err(e) = record.world_map.teleport(to) {
        tracing::warn!(narrative_id = %record.narrative_id, error = %e, "Detected move ignored");
        return;
    }
    announce_arrival(record, to, before, events);
}

/// Post the arrival notice and stamp the move with the notice's own `sort_order`.
fn announce_arrival(
    record: &mut NarrativeRecord,
    at: Coords,
    before: NavigationSnapshot,
    events: &mut Vec<NarrativeEvent>,
) {
    let name = record
        .world_map
        .location_at(at)
        .map(Location::display_name)
        .unwrap_or_else(|| at.to_string());
    let message = record
        .timeline
        .append(NewMessage::system(format!("You have moved to {name}.")));
    record.journal.record_snapshot(message.sort_order, before);
    events.push(message_appended(message));

    tracing::info!(narrative_id = %record.narrative_id, %at, %name, "Arrived");
    events.push(NarrativeEvent::Arrived { at, name });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::timeline::Emotion;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Replies with a fixed line and remembers every prompt. Analysis requests get
    /// `analysis` back, or a line that is not JSON.
    #[derive(Default)]
    struct Scripted {
        prompts: std::sync::Mutex<Vec<String>>,
        analysis_prompts: std::sync::Mutex<Vec<String>>,
        analysis: Option<String>,
    }

    impl Scripted {
        fn analysing(analysis: &str) -> Self {
            Self {
                analysis: Some(analysis.to_string()),
                ..Self::default()
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        fn analysis_prompts(&self) -> Vec<String> {
            self.analysis_prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
            if request.expect_json {
                self.analysis_prompts.lock().unwrap().push(request.prompt);
                return Ok(self.analysis.clone().unwrap_or_else(|| "no idea".to_string()));
            }
            self.prompts.lock().unwrap().push(request.prompt);
            Ok("  The wind answers.  ".to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            Err(GenerationError::RequestFailed("503".to_string()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl TextGenerator for Stalled {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }
    }

    fn story() -> Story {
        Story::new("Low Tide")
            .with_character(Character::new("Mara").as_user())
            .with_character(Character::new("Narrator").as_narrator())
            .with_character(Character::new("Ayla"))
            .with_entry(
                DynamicEntryDefinition::new("The Sword", "sword")
                    .with_content("A")
                    .with_content("B"),
            )
            .with_static_entry(StaticEntry::new("Premise", "The sea has vanished."))
    }

    fn config(policy: RewindPolicy) -> EngineConfig {
        EngineConfig {
            dispatch_seed: Some(17),
            rewind_policy: policy,
            ..EngineConfig::default()
        }
    }

    fn engine<G: TextGenerator>(generator: G) -> NarrativeEngine<InMemoryStore, G> {
        NarrativeEngine::new(
            InMemoryStore::new(),
            generator,
            config(RewindPolicy::RollBackDerivedState),
        )
    }

    #[tokio::test]
    async fn test_take_turn_appends_user_message_and_reply() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let user = story.roster[0].id;

        let outcome = engine
            .take_turn(id, &story, user, "I draw my sword", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.user_message.sort_order, 0);
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.sort_order, 1);
        assert_eq!(reply.content, "The wind answers.");
        assert_ne!(outcome.speaker, Some(user));

        let entry_id = story.dynamic_entries[0].id;
        assert!(outcome
            .events
            .contains(&NarrativeEvent::EntryTriggered { entry_id, turn: 0 }));

        let prompt = &engine.generator.prompts()[0];
        assert!(prompt.contains("The Sword: A"));
        assert!(prompt.contains("Premise: The sea has vanished."));
        assert!(prompt.contains("Mara: I draw my sword"));

        let messages = engine.messages(id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].emotion, Some(Emotion::Neutral));
        assert_eq!(engine.generator.analysis_prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_analysis_tags_emotion_and_follows_named_move() {
        let engine = engine(Scripted::analysing(
            "{\"emotion\": \"happy\", \"locationName\": \"Market\"}",
        ));
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        engine
            .update_location(
                id,
                Coords::new(4, 4),
                LocationPatch {
                    name: Some("Market".to_string()),
                    ..LocationPatch::default()
                },
            )
            .await
            .unwrap();

        let user = story.roster[0].id;
        let outcome = engine
            .take_turn(id, &story, user, "Let's go to the market.", &CancellationToken::new())
            .await
            .unwrap();

        let analysis_prompts = engine.generator.analysis_prompts();
        assert!(analysis_prompts[0].contains("[Market]"));
        assert!(analysis_prompts[0].contains("Let's go to the market."));
        assert!(analysis_prompts[1].contains("The wind answers."));

        assert_eq!(outcome.reply.unwrap().emotion, Some(Emotion::Happy));
        assert!(outcome.events.iter().any(NarrativeEvent::is_arrival));
        let messages = engine.messages(id).await.unwrap();
        assert_eq!(messages[2].content, "You have moved to Market.");
        assert_eq!(messages[2].sort_order, 2);
        assert_eq!(engine.world_map(id).await.unwrap().current(), Coords::new(4, 4));

        // Keeping the reply but not the notice undoes the move.
        engine.rewind(id, 1).await.unwrap();
        assert_eq!(engine.world_map(id).await.unwrap().current(), Coords::new(3, 3));
    }

    #[tokio::test]
    async fn test_analysis_can_be_disabled() {
        let engine = NarrativeEngine::new(
            InMemoryStore::new(),
            Scripted::analysing("{\"emotion\": \"sad\"}"),
            EngineConfig {
                analysis_enabled: false,
                ..config(RewindPolicy::RollBackDerivedState)
            },
        );
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();

        let outcome = engine
            .take_turn(id, &story, story.roster[0].id, "Hi", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reply.unwrap().emotion, None);
        assert!(engine.generator.analysis_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_lore_cycles_across_turns() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let user = story.roster[0].id;
        let token = CancellationToken::new();

        for _ in 0..3 {
            engine
                .take_turn(id, &story, user, "sword!", &token)
                .await
                .unwrap();
        }

        let prompts = engine.generator.prompts();
        assert!(prompts[0].contains("The Sword: A"));
        assert!(prompts[1].contains("The Sword: B"));
        assert!(prompts[2].contains("The Sword: A"));
    }

    #[tokio::test]
    async fn test_arrival_adds_system_message_and_narrator_replies() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        engine
            .update_location(
                id,
                Coords::new(4, 3),
                LocationPatch {
                    name: Some("Lighthouse".to_string()),
                    ..LocationPatch::default()
                },
            )
            .await
            .unwrap();

        let plan = engine.plan_travel(id, Coords::new(4, 3)).await.unwrap();
        assert_eq!(plan.steps, vec![Coords::new(4, 3)]);

        let outcome = engine
            .take_turn(id, &story, story.roster[0].id, "Onward.", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.speaker, Some(story.roster[1].id));
        let messages = engine.messages(id).await.unwrap();
        assert_eq!(messages[1].content, "You have moved to Lighthouse.");
        assert_eq!(messages[1].sort_order, 1);
        assert_eq!(messages[2].sort_order, 2);

        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(4, 3));
        assert!(!map.is_travelling());

        // The arrival belongs to its notice, not to the user message before it.
        engine.rewind(id, 0).await.unwrap();
        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(3, 3));
        assert_eq!(map.destination(), Some(Coords::new(4, 3)));

        engine.rewind(id, 1).await.unwrap();
        assert_eq!(engine.messages(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_step_travel_arrival_stays_with_its_notice() {
        let engine = engine(Scripted::default());
        let id = engine.create_narrative(&story()).await.unwrap();
        engine.plan_travel(id, Coords::new(3, 4)).await.unwrap();

        engine.step_travel(id).await.unwrap();
        let messages = engine.messages(id).await.unwrap();
        assert_eq!(messages[0].content, "You have moved to (3, 4).");

        engine.rewind(id, 0).await.unwrap();
        assert_eq!(engine.world_map(id).await.unwrap().current(), Coords::new(3, 4));
    }

    #[tokio::test]
    async fn test_deleted_tail_order_is_not_reused_by_later_turns() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let user = story.roster[0].id;
        let token = CancellationToken::new();

        engine
            .append_message(id, NewMessage::system("The story begins."))
            .await
            .unwrap();
        let first = engine.take_turn(id, &story, user, "Hello", &token).await.unwrap();
        engine.plan_travel(id, Coords::new(3, 7)).await.unwrap();
        engine
            .delete_message(id, first.reply.unwrap().id)
            .await
            .unwrap();

        let second = engine.take_turn(id, &story, user, "Onward", &token).await.unwrap();
        assert_eq!(second.user_message.sort_order, 3);
        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(3, 4));
        assert_eq!(map.path_len(), 3);

        engine.rewind(id, 3).await.unwrap();
        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(3, 4));
        assert_eq!(map.destination(), Some(Coords::new(3, 7)));

        engine.rewind(id, 2).await.unwrap();
        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(3, 3));
        assert!(!map.is_travelling());
    }

    #[tokio::test]
    async fn test_step_travel_outside_turns() {
        let engine = engine(Scripted::default());
        let id = engine.create_narrative(&story()).await.unwrap();
        engine.plan_travel(id, Coords::new(3, 5)).await.unwrap();

        let first = engine.step_travel(id).await.unwrap();
        assert_eq!(first, vec![NarrativeEvent::StepTaken { at: Coords::new(3, 4) }]);

        let second = engine.step_travel(id).await.unwrap();
        assert!(second.iter().any(NarrativeEvent::is_arrival));
        assert!(engine.step_travel(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_appends_no_reply() {
        let engine = engine(Stalled);
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let error = engine
            .take_turn(id, &story, story.roster[0].id, "Hello?", &token)
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        let messages = engine.messages(id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello?");
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_user_message() {
        let engine = engine(Failing);
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();

        let error = engine
            .take_turn(id, &story, story.roster[0].id, "Hello?", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(!error.is_cancelled());
        assert!(matches!(
            error,
            EngineError::Generation(GenerationError::RequestFailed(_))
        ));
        assert_eq!(engine.messages(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_speaker_skips_generation() {
        let engine = engine(Scripted::default());
        let story = Story::new("Alone").with_character(Character::new("Mara").as_user());
        let id = engine.create_narrative(&story).await.unwrap();

        let outcome = engine
            .take_turn(id, &story, story.roster[0].id, "Anyone?", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.speaker.is_none());
        assert!(outcome.reply.is_none());
        assert!(engine.generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_rewind_rolls_back_derived_state() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let token = CancellationToken::new();

        engine
            .append_message(id, NewMessage::system("The story begins."))
            .await
            .unwrap();
        engine.plan_travel(id, Coords::new(5, 3)).await.unwrap();
        engine
            .take_turn(id, &story, story.roster[0].id, "sword", &token)
            .await
            .unwrap();
        assert_eq!(engine.world_map(id).await.unwrap().current(), Coords::new(4, 3));

        let event = engine.rewind(id, 0).await.unwrap();
        assert_eq!(
            event,
            NarrativeEvent::Rewound {
                after_sort_order: 0,
                removed: 2
            }
        );

        let map = engine.world_map(id).await.unwrap();
        assert_eq!(map.current(), Coords::new(3, 3));
        assert!(!map.is_travelling());
        let record = engine.store().load(id).await.unwrap();
        assert_eq!(record.lore.triggered_count(), 0);

        let next = engine
            .append_message(id, NewMessage::system("Again."))
            .await
            .unwrap();
        assert_eq!(next.sort_order, 1);
    }

    #[tokio::test]
    async fn test_rewind_can_keep_derived_state() {
        let engine = NarrativeEngine::new(
            InMemoryStore::new(),
            Scripted::default(),
            config(RewindPolicy::KeepDerivedState),
        );
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        engine
            .append_message(id, NewMessage::system("The story begins."))
            .await
            .unwrap();
        engine
            .take_turn(id, &story, story.roster[0].id, "sword", &CancellationToken::new())
            .await
            .unwrap();

        engine.rewind(id, 0).await.unwrap();

        let record = engine.store().load(id).await.unwrap();
        assert_eq!(record.timeline.len(), 1);
        let entry_id = story.dynamic_entries[0].id;
        assert!(record.lore.is_triggered(entry_id));
        assert!(record.lore.state(entry_id).unwrap().consumed_at.is_empty());
        assert!(record.journal.is_empty());
    }

    #[tokio::test]
    async fn test_keep_derived_state_records_no_undo_history() {
        let engine = NarrativeEngine::new(
            InMemoryStore::new(),
            Scripted::default(),
            config(RewindPolicy::KeepDerivedState),
        );
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let token = CancellationToken::new();
        engine.plan_travel(id, Coords::new(3, 7)).await.unwrap();

        for _ in 0..3 {
            engine
                .take_turn(id, &story, story.roster[0].id, "sword", &token)
                .await
                .unwrap();
        }

        let record = engine.store().load(id).await.unwrap();
        assert!(record.journal.is_empty());
        let state = record.lore.state(story.dynamic_entries[0].id).unwrap();
        assert!(state.consumed_at.is_empty());
        assert_eq!(state.sealed, 3);
        assert!(engine.generator.prompts()[2].contains("The Sword: A"));
    }

    #[tokio::test]
    async fn test_concurrent_turns_are_serialized() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let user = story.roster[0].id;
        let token = CancellationToken::new();

        let (first, second) = tokio::join!(
            engine.take_turn(id, &story, user, "one", &token),
            engine.take_turn(id, &story, user, "two", &token),
        );
        first.unwrap();
        second.unwrap();

        let orders: Vec<u64> = engine
            .messages(id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sort_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_message_operations() {
        let engine = engine(Scripted::default());
        let id = engine.create_narrative(&story()).await.unwrap();
        let message = engine
            .append_message(id, NewMessage::event("A bell rings."))
            .await
            .unwrap();

        let edited = engine
            .edit_message(
                id,
                message.id,
                MessagePatch {
                    content: Some("Two bells ring.".to_string()),
                    ..MessagePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.content, "Two bells ring.");
        assert_eq!(edited.sort_order, message.sort_order);

        engine.mark_read(id).await.unwrap();
        assert!(engine.messages(id).await.unwrap().iter().all(|m| !m.is_new));

        engine.delete_message(id, message.id).await.unwrap();
        assert!(engine.messages(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_narrative_and_location() {
        let engine = engine(Scripted::default());
        let missing = NarrativeId::new();
        assert!(matches!(
            engine.messages(missing).await,
            Err(EngineError::UnknownNarrative(_))
        ));

        let id = engine.create_narrative(&story()).await.unwrap();
        assert!(matches!(
            engine
                .update_location(id, Coords::new(9, 9), LocationPatch::default())
                .await,
            Err(EngineError::UnknownLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_narrative_leaves_no_lock_behind() {
        let engine = engine(Scripted::default());
        let story = story();

        for _ in 0..3 {
            let missing = NarrativeId::new();
            assert!(engine.plan_travel(missing, Coords::new(0, 0)).await.is_err());
            assert!(engine
                .take_turn(missing, &story, story.roster[0].id, "Hi", &CancellationToken::new())
                .await
                .is_err());
            assert!(engine.delete_narrative(missing).await.is_err());
        }

        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_turn_with_another_story_is_rejected() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let other = self::story();

        let error = engine
            .take_turn(id, &other, other.roster[0].id, "Hi", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            EngineError::StoryMismatch { narrative_id, expected, found }
                if narrative_id == id && expected == story.id && found == other.id
        ));
        assert!(engine.messages(id).await.unwrap().is_empty());
        assert!(matches!(
            engine
                .consume_lore(id, &other, other.dynamic_entries[0].id)
                .await,
            Err(EngineError::StoryMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_narrative_cascades() {
        let engine = engine(Scripted::default());
        let id = engine.create_narrative(&story()).await.unwrap();
        engine
            .append_message(id, NewMessage::system("Hello"))
            .await
            .unwrap();

        engine.delete_narrative(id).await.unwrap();
        assert!(matches!(
            engine.world_map(id).await,
            Err(EngineError::UnknownNarrative(_))
        ));
        assert!(matches!(
            engine.delete_narrative(id).await,
            Err(EngineError::UnknownNarrative(_))
        ));
    }

    #[tokio::test]
    async fn test_consume_lore_and_triggers() {
        let engine = engine(Scripted::default());
        let story = story();
        let id = engine.create_narrative(&story).await.unwrap();
        let entry_id = story.dynamic_entries[0].id;

        assert!(matches!(
            engine.consume_lore(id, &story, entry_id).await,
            Err(EngineError::Lore(LoreError::UnknownEntry(_)))
        ));
        assert!(matches!(
            engine.consume_lore(id, &story, DynamicEntryId::new()).await,
            Err(EngineError::UnknownEntry(_))
        ));

        let fired = engine
            .evaluate_triggers(id, "a sword", 0, &story.dynamic_entries)
            .await
            .unwrap();
        assert_eq!(fired, vec![entry_id]);
        assert_eq!(engine.consume_lore(id, &story, entry_id).await.unwrap(), "A");
        assert_eq!(engine.consume_lore(id, &story, entry_id).await.unwrap(), "B");
    }

    #[tokio::test]
    async fn test_invalid_story_triggers_are_rejected() {
        let engine = engine(Scripted::default());
        let story = story().with_entry(DynamicEntryDefinition::new("Bad", "a XOR b XOR c"));
        assert!(matches!(
            engine.create_narrative(&story).await,
            Err(EngineError::InvalidTrigger(_))
        ));
    }

    #[tokio::test]
    async fn test_choose_speaker_respects_weights() {
        let engine = engine(Scripted::default());
        let story = story();
        let candidates = vec![
            CharacterTurnCandidate {
                character_id: story.roster[1].id,
                weight: 0.0,
            },
            CharacterTurnCandidate {
                character_id: story.roster[2].id,
                weight: 5.0,
            },
        ];
        for _ in 0..50 {
            assert_eq!(engine.choose_speaker(&candidates), Some(story.roster[2].id));
        }
        assert_eq!(engine.choose_speaker(&[]), None);

        let id = engine.create_narrative(&story).await.unwrap();
        let speaker = engine.next_speaker(id, &story.roster).await.unwrap();
        assert!(speaker.is_some());
        assert_ne!(speaker, Some(story.roster[0].id));
    }
}

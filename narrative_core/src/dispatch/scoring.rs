//! Speaker scoring: turning the roster and recent history into dispatch weights.

use rand::Rng;
use world_rules::{Character, CharacterId};

use super::TurnDispatcher;
use crate::timeline::Message;

/// Configuration for speaker scoring.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// How many recent messages count against a character who just spoke.
    pub recency_window: usize,

    /// Weight removed per recent line, scaled by how recent it was.
    pub recency_penalty: f64,

    /// Floor applied to every weight so nobody is ruled out entirely.
    pub min_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_window: 5,
            recency_penalty: 0.2,
            min_weight: 0.1,
        }
    }
}

/// A character and its weight for the current dispatch decision.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterTurnCandidate {
    pub character_id: CharacterId,
    pub weight: f64,
}

/// Score every character that can take a turn.
///
/// Non-narrators start at 1, narrators at 0. For each of the last `recency_window` chat
/// messages (newest first, index `i`), its speaker loses `(window - i) * penalty`.
/// Weights never drop below `min_weight`.
pub fn score_candidates(
    roster: &[Character],
    recent: &[&Message],
    config: &ScoringConfig,
) -> Vec<CharacterTurnCandidate> {
    let mut candidates: Vec<CharacterTurnCandidate> = roster
        .iter()
        .filter(|c| c.can_take_turn())
        .map(|c| CharacterTurnCandidate {
            character_id: c.id,
            weight: if c.is_narrator { 0.0 } else { 1.0 },
        })
        .collect();

    let window = config.recency_window;
    let recent_chat = recent.iter().rev().take(window).enumerate();
    for (i, message) in recent_chat {
        if !message.is_chat() {
            continue;
        }
        let Some(speaker) = message.character_id else {
            continue;
        };
        if let Some(candidate) = candidates.iter_mut().find(|c| c.character_id == speaker) {
            candidate.weight -= (window - i) as f64 * config.recency_penalty;
        }
    }

    for candidate in &mut candidates {
        candidate.weight = candidate.weight.max(config.min_weight);
    }

    candidates
}

impl<R: Rng> TurnDispatcher<R> {
    /// Pick the next speaker from a roster.
    ///
    /// Nobody can speak when no active, non-user character exists. A lone candidate always
    /// speaks. Right after an arrival a narrator is preferred when one is available.
    pub fn next_speaker(
        &mut self,
        roster: &[Character],
        recent: &[&Message],
        after_arrival: bool,
        config: &ScoringConfig,
    ) -> Option<CharacterId> {
        let pool: Vec<&Character> = roster.iter().filter(|c| c.can_take_turn()).collect();
        match pool.as_slice() {
            [] => return None,
            [only] => return Some(only.id),
            _ => {}
        }

        if after_arrival {
            let narrators: Vec<CharacterId> = pool
                .iter()
                .filter(|c| c.is_narrator)
                .map(|c| c.id)
                .collect();
            if let Some(narrator) = self.choose_uniform(&narrators) {
                return Some(*narrator);
            }
        }

        let candidates = score_candidates(roster, recent, config);
        let ids: Vec<CharacterId> = candidates.iter().map(|c| c.character_id).collect();
        let weights: Vec<f64> = candidates.iter().map(|c| c.weight).collect();
        self.choose_next(&ids, &weights).copied()
    }
}

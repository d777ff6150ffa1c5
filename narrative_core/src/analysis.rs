//! Turn analysis - the speaker's emotion and any move a line of text asks for.
//!
//! The AI is asked to classify a piece of text and answers with a small JSON object.
//! Location names are restricted to the current cell and its neighbours, so a detected
//! move is always a single hop.

use serde::Deserialize;
use world_rules::{Location, WorldMap};

use crate::generation::{extract_json, GenerationError};
use crate::timeline::Emotion;

/// What the AI read out of a line of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnAnalysis {
    pub emotion: Emotion,

    /// A location the text explicitly moves to.
    pub location_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnalysisReply {
    emotion: Option<String>,
    location_name: Option<String>,
}

/// Names a move may target: the current location and its named neighbours, or every
/// named location when none of those has a name yet.
pub fn location_candidates(map: &WorldMap) -> Vec<String> {
    let named = |loc: &&Location| !loc.name.trim().is_empty();
    let mut names: Vec<String> = map
        .neighbourhood(map.current())
        .into_iter()
        .filter(named)
        .map(|loc| loc.name.trim().to_string())
        .collect();
    if names.is_empty() {
        names = map
            .locations()
            .iter()
            .filter(named)
            .map(|loc| loc.name.trim().to_string())
            .collect();
    }

    let mut seen = Vec::with_capacity(names.len());
    names.retain(|name| {
        if seen.contains(name) {
            false
        } else {
            seen.push(name.clone());
            true
        }
    });
    names
}

/// Build the classification prompt for `text`.
pub fn analysis_prompt(text: &str, candidates: &[String]) -> String {
    format!(
        "Analyze the text below.\n\
         1. Identify the speaker's emotion, one of: happy, sad, angry, surprised, neutral.\n\
         2. Decide whether the text explicitly moves to a location. Only these locations \
         may be chosen: [{}]. If none of them is clearly meant, use null.\n\
         TEXT: \"{text}\"\n\
         Reply with JSON only: {{ \"emotion\": \"string\", \"locationName\": \"string\" or null }}",
        candidates.join(", ")
    )
}

/// Parse the AI's classification. Unknown emotions become neutral.
pub fn parse_analysis(reply: &str) -> Result<TurnAnalysis, GenerationError> {
    let value = extract_json(reply)?;
    let parsed: AnalysisReply = serde_json::from_value(value)
        .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

    Ok(TurnAnalysis {
        emotion: parsed
            .emotion
            .as_deref()
            .map(Emotion::parse)
            .unwrap_or_default(),
        location_name: parsed
            .location_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
    })
}

/// The location an analysis moves to, if it names a candidate other than where the
/// narrative already is.
pub fn resolve_move<'a>(
    map: &'a WorldMap,
    analysis: &TurnAnalysis,
    candidates: &[String],
) -> Option<&'a Location> {
    let name = analysis.location_name.as_deref()?;
    let target = map.find_by_name(name)?;
    let allowed = candidates
        .iter()
        .any(|c| c.eq_ignore_ascii_case(target.name.trim()));
    (allowed && target.coords != map.current()).then_some(target)
}

//! Trigger expressions for dynamic entries.
//!
//! An expression is a comma-separated list of groups; the entry fires when any group
//! matches. A group is one of:
//!
//! - `keyword` or `multi word phrase` - present in the text
//! - `a AND b AND c` - every keyword present
//! - `a XOR b` - exactly one of the two present
//!
//! Keywords match whole words, ignoring case. Percentage parts such as `30%` are accepted
//! for compatibility with imported stories but ignored: triggering must stay a pure
//! function of the text.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Errors raised while parsing a trigger expression.
#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("XOR group needs exactly two keywords: {0:?}")]
    InvalidXor(String),

    #[error("invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A single keyword or phrase with its compiled whole-word matcher.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub text: String,
    pattern: Regex,
}

impl Keyword {
    pub fn new(text: &str) -> Result<Self, TriggerError> {
        let text = text.trim().to_lowercase();
        // Word boundaries only make sense next to word characters ("c++" has none at its end).
        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        let prefix = if is_word(text.chars().next()) { r"\b" } else { "" };
        let suffix = if is_word(text.chars().last()) { r"\b" } else { "" };
        let pattern = RegexBuilder::new(&format!("{prefix}{}{suffix}", regex::escape(&text)))
            .case_insensitive(true)
            .build()?;
        Ok(Self { text, pattern })
    }

    pub fn is_match(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }
}

/// One comma-separated part of a trigger expression.
#[derive(Debug, Clone)]
pub enum TriggerGroup {
    Any(Keyword),
    All(Vec<Keyword>),
    ExactlyOne(Keyword, Keyword),
}

impl TriggerGroup {
    fn parse(part: &str) -> Result<Self, TriggerError> {
        if part.contains(" XOR ") {
            let keywords: Vec<_> = part
                .split(" XOR ")
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .collect();
            return match keywords.as_slice() {
                [first, second] => Ok(TriggerGroup::ExactlyOne(
                    Keyword::new(first)?,
                    Keyword::new(second)?,
                )),
                _ => Err(TriggerError::InvalidXor(part.to_string())),
            };
        }

        if part.contains(" AND ") {
            let keywords = part
                .split(" AND ")
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(Keyword::new)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(TriggerGroup::All(keywords));
        }

        Ok(TriggerGroup::Any(Keyword::new(part)?))
    }

    pub fn is_match(&self, content: &str) -> bool {
        match self {
            TriggerGroup::Any(keyword) => keyword.is_match(content),
            TriggerGroup::All(keywords) => {
                !keywords.is_empty() && keywords.iter().all(|k| k.is_match(content))
            }
            TriggerGroup::ExactlyOne(first, second) => {
                first.is_match(content) != second.is_match(content)
            }
        }
    }
}

/// A parsed trigger expression.
#[derive(Debug, Clone, Default)]
pub struct TriggerExpression {
    groups: Vec<TriggerGroup>,
}

impl TriggerExpression {
    /// Parse an expression such as `"sword, blade AND cursed, day XOR night, 20%"`.
    pub fn parse(source: &str) -> Result<Self, TriggerError> {
        let groups = source
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty() && !is_chance(part))
            .map(TriggerGroup::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { groups })
    }

    /// Check if any group matches the text.
    pub fn is_match(&self, content: &str) -> bool {
        self.groups.iter().any(|g| g.is_match(content))
    }

    pub fn groups(&self) -> &[TriggerGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn is_chance(part: &str) -> bool {
    match part.strip_suffix('%') {
        Some(number) => {
            let number = number.trim_end();
            !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

//! Lore module - dynamic entries that enter the story once their triggers are mentioned.
//!
//! - **Definitions**: story-scoped templates with trigger expressions and content variants
//! - **Triggers**: whole-word, case-insensitive keyword expressions
//! - **Tracker**: per-narrative record of what has fired and which variant comes next

mod entry;
mod tracker;
mod trigger;

pub use entry::*;
pub use tracker::*;
pub use trigger::*;

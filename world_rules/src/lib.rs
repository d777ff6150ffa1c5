//! # World Rules
//!
//! The "World Bible" crate - identifiers, the story roster, the per-narrative world map
//! and the rules for travelling across it. This crate is the single source of truth for
//! where a narrative is located and does not contain any AI logic.

pub mod entities;
pub mod mechanics;
pub mod world_state;

pub use entities::*;
pub use mechanics::*;
pub use world_state::*;

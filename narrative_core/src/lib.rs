//! # Narrative Core (The Cortex)
//!
//! The "brain" of the narrative system. This crate sits on top of `world_rules`, tracks
//! what each narrative has said and revealed, decides who speaks next and assembles the
//! context handed to the AI collaborator.
//!
//! ## Core Components
//!
//! - **timeline**: Ordered message history with rewind and read state
//! - **lore**: Dynamic entry triggers and per-narrative content cycling
//! - **dispatch**: Weighted random choice of the next speaker
//! - **context_assembler**: Builds the prompt for the next reply
//! - **analysis**: Emotion tags and moves read out of a turn's text
//! - **generation**: Provider-agnostic, cancellable text generation
//! - **store**: Persistence of narrative records
//! - **engine**: One writer per narrative, running full turns
//!
//! ## Design Philosophy
//!
//! - **Deterministic where it matters**: triggers and travel replay identically; only
//!   dispatch is random, and its source can be seeded
//! - **One write per change**: everything a turn derives is committed together
//! - **Instance-owned state**: locks, random source and configuration live on the engine

pub mod analysis;
pub mod config;
pub mod context_assembler;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod generation;
pub mod lore;
pub mod store;
pub mod story;
pub mod timeline;

pub use analysis::*;
pub use config::*;
pub use context_assembler::*;
pub use dispatch::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use generation::*;
pub use lore::*;
pub use store::*;
pub use story::*;
pub use timeline::*;

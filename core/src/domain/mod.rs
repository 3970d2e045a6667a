//! Domain layer - Pure business logic and data models.
//!
//! This module contains the knock sequence, knock events and the per-source
//! state machine. These types have no I/O dependencies and can be tested in
//! isolation.

mod knock;
mod sequence;
mod tracker;

// Re-export all domain types
pub use knock::{KnockEvent, SourceIdentity};
pub use sequence::KnockSequence;
pub use tracker::{KnockOutcome, SequenceTracker, SourceState, Transition};

//! Knockgate Core Library
//!
//! Passive port-knock detection. Watches a fixed set of decoy ports and,
//! for each source address, checks whether connection attempts arrive in the
//! configured order within a time window. A completed sequence opens the
//! protected port through a pluggable firewall backend.
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Knock sequence, events and the per-source state machine
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: TCP listener and firewall backends
//! - `engine`: The detection loop tying them together

// Hexagonal architecture layers
pub mod domain;
pub mod ports;
pub mod adapters;

pub mod config;
pub mod engine;
pub mod error;

// Re-export domain types (primary API)
pub use domain::{
    KnockEvent, KnockOutcome, KnockSequence, SequenceTracker, SourceIdentity, SourceState,
    Transition,
};

// Re-export other commonly used types
pub use adapters::{DryRunFirewall, IptablesFirewall, TcpKnockListener};
pub use config::{ConfigStore, KnockConfig, ValidatedConfig};
pub use engine::{EngineSummary, KnockEngine};
pub use error::{Error, FirewallError, Result};
pub use ports::{FirewallPort, KnockSource};

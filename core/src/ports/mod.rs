//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces the engine uses to interact with
//! external systems. Implementations live in `adapters`.

mod firewall;
mod listener;

pub use firewall::FirewallPort;
pub use listener::KnockSource;

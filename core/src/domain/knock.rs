//! Knock event domain model.

use std::net::IpAddr;
use std::time::Instant;

/// Key used to correlate separate knocks into one attempt.
///
/// Only the address counts: every knock arrives on a different socket with a
/// fresh ephemeral source port.
pub type SourceIdentity = IpAddr;

/// A single connection attempt observed on a knock port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnockEvent {
    /// Knock port that was touched.
    pub port: u16,
    /// Address the attempt came from.
    pub source: SourceIdentity,
    /// When the attempt was accepted.
    pub at: Instant,
}

impl KnockEvent {
    pub fn new(port: u16, source: SourceIdentity, at: Instant) -> Self {
        Self { port, source, at }
    }
}

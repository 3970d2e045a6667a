//! Knock sequence domain model.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Ordered list of distinct ports that must be knocked to authenticate.
///
/// A port appears at most once, so it is the expected knock at exactly one
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnockSequence(Vec<u16>);

impl KnockSequence {
    /// Build a sequence, rejecting empty lists, port 0 and duplicates.
    pub fn new(ports: Vec<u16>) -> Result<Self> {
        if ports.is_empty() {
            return Err(Error::Config(
                "Knock sequence must contain at least one port".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(ports.len());
        for &port in &ports {
            if port == 0 {
                return Err(Error::Config("Knock port 0 is not a valid port".to_string()));
            }
            if !seen.insert(port) {
                return Err(Error::Config(format!(
                    "Knock port {} appears more than once in the sequence",
                    port
                )));
            }
        }

        Ok(Self(ports))
    }

    /// Number of knocks required.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed sequence.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Port expected at `index`.
    pub fn expected(&self, index: usize) -> Option<u16> {
        self.0.get(index).copied()
    }

    /// Whether `port` belongs to the sequence.
    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    pub fn ports(&self) -> &[u16] {
        &self.0
    }
}

impl std::fmt::Display for KnockSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports = self
            .0
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        write!(f, "{}", ports)
    }
}

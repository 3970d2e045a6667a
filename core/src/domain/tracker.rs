//! Per-source knock sequence state machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{KnockEvent, KnockSequence, SourceIdentity};

/// Progress of one source through the knock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceState {
    /// Index of the next expected knock, always below the sequence length.
    pub next_index: usize,
    /// Arrival time of the knock that opened the current attempt.
    pub window_start: Instant,
}

impl SourceState {
    fn fresh(now: Instant) -> Self {
        Self {
            next_index: 0,
            window_start: now,
        }
    }
}

/// What a single knock did to its source's attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnockOutcome {
    /// Correct knock; `index` knocks of the sequence are now done.
    Advanced { source: SourceIdentity, index: usize },
    /// Wrong port; the attempt starts over on the next knock.
    Reset { source: SourceIdentity, port: u16 },
    /// Final knock of the sequence; the source's state has been removed.
    Completed { source: SourceIdentity },
}

/// Result of [`SequenceTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub outcome: KnockOutcome,
    /// The previous attempt's window had elapsed and was discarded before the
    /// knock was evaluated.
    pub window_expired: bool,
}

/// Tracks every source's progress through the knock sequence.
///
/// Sources are independent: a knock only ever touches the state of the
/// address it came from.
#[derive(Debug)]
pub struct SequenceTracker {
    sequence: KnockSequence,
    window: Duration,
    states: HashMap<SourceIdentity, SourceState>,
}

impl SequenceTracker {
    pub fn new(sequence: KnockSequence, window: Duration) -> Self {
        Self {
            sequence,
            window,
            states: HashMap::new(),
        }
    }

    pub fn sequence(&self) -> &KnockSequence {
        &self.sequence
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Apply one knock and return the resulting transition.
    ///
    /// A window counts as expired only when strictly more than `window` has
    /// passed since its first knock. A wrong knock opens a new window at its
    /// own arrival time but is not credited as the first knock of the new
    /// attempt, even when it hits the sequence's first port.
    pub fn observe(&mut self, event: &KnockEvent) -> Transition {
        let KnockEvent { port, source, at: now } = *event;

        let mut state = self
            .states
            .get(&source)
            .copied()
            .unwrap_or_else(|| SourceState::fresh(now));

        let window_expired = self.is_expired(&state, now);
        if window_expired {
            state = SourceState::fresh(now);
        }

        let outcome = match self.sequence.expected(state.next_index) {
            Some(expected) if expected == port => {
                let index = state.next_index + 1;
                if index == self.sequence.len() {
                    self.states.remove(&source);
                    KnockOutcome::Completed { source }
                } else {
                    self.states.insert(
                        source,
                        SourceState {
                            next_index: index,
                            window_start: state.window_start,
                        },
                    );
                    KnockOutcome::Advanced { source, index }
                }
            }
            _ => {
                self.states.insert(source, SourceState::fresh(now));
                KnockOutcome::Reset { source, port }
            }
        };

        Transition {
            outcome,
            window_expired,
        }
    }

    /// Drop every attempt whose window has elapsed. Returns how many were
    /// removed.
    ///
    /// Purging never changes the result of a later [`observe`](Self::observe):
    /// an expired record is discarded on its next knock anyway.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.states.len();
        self.states
            .retain(|_, state| now.saturating_duration_since(state.window_start) <= window);
        before - self.states.len()
    }

    /// Current state for `source`, if it has an attempt in progress.
    pub fn progress(&self, source: &SourceIdentity) -> Option<SourceState> {
        self.states.get(source).copied()
    }

    /// Number of sources with a tracked attempt.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    fn is_expired(&self, state: &SourceState, now: Instant) -> bool {
        now.saturating_duration_since(state.window_start) > self.window
    }
}

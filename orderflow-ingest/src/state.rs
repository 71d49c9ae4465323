//! Per-input processing state machine.
//!
//! ```text
//! Decoded ──→ StorePending ──→ StoreCommitted ──→ CachePending ──→ Done
//!    │             │
//!    └── Failed ←──┘
//! ```
//!
//! `Failed` is reachable only before the store commits. Once the transaction
//! is durable the input always ends in `Done`; cache trouble is advisory.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing state of one ingestion input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Input received and handed to the decoder
    Decoded,
    /// Transactional store write in progress
    StorePending,
    /// Store transaction committed
    StoreCommitted,
    /// Cache projection in progress
    CachePending,
    /// Fully processed (terminal)
    Done,
    /// Rejected or not persisted (terminal)
    Failed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Decoded => "Decoded",
            ProcessState::StorePending => "StorePending",
            ProcessState::StoreCommitted => "StoreCommitted",
            ProcessState::CachePending => "CachePending",
            ProcessState::Done => "Done",
            ProcessState::Failed => "Failed",
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Done | ProcessState::Failed)
    }

    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Decoded, StorePending)
                | (Decoded, Failed)
                | (StorePending, StoreCommitted)
                | (StorePending, Failed)
                | (StoreCommitted, CachePending)
                | (CachePending, Done)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered record of the states one input passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StateTracker {
    history: Vec<ProcessState>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            history: vec![ProcessState::Decoded],
        }
    }

    pub(crate) fn current(&self) -> ProcessState {
        self.history
            .last()
            .copied()
            .unwrap_or(ProcessState::Decoded)
    }

    /// Record a transition. Illegal transitions are a programming error.
    pub(crate) fn advance(&mut self, next: ProcessState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal transition {} -> {}",
            self.current(),
            next
        );
        self.history.push(next);
    }

    pub(crate) fn into_history(self) -> Vec<ProcessState> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProcessState; 6] = [
        ProcessState::Decoded,
        ProcessState::StorePending,
        ProcessState::StoreCommitted,
        ProcessState::CachePending,
        ProcessState::Done,
        ProcessState::Failed,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_failed_unreachable_after_commit() {
        assert!(!ProcessState::StoreCommitted.can_transition_to(ProcessState::Failed));
        assert!(!ProcessState::CachePending.can_transition_to(ProcessState::Failed));
    }

    #[test]
    fn test_happy_path_is_legal() {
        let mut tracker = StateTracker::new();
        for next in [
            ProcessState::StorePending,
            ProcessState::StoreCommitted,
            ProcessState::CachePending,
            ProcessState::Done,
        ] {
            tracker.advance(next);
        }
        assert_eq!(tracker.current(), ProcessState::Done);
        assert_eq!(tracker.into_history().len(), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessState::StoreCommitted.to_string(), "StoreCommitted");
    }
}

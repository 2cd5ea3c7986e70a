// ABOUTME: Interaction state machine and the guard that publishes transitions
// ABOUTME: A guard dropped before a terminal state records the interaction as aborted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle of one interaction
///
/// `Idle -> ContextLoaded -> Generating -> Finalizing -> Completed`, with
/// `Aborted` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// Created, nothing loaded
    Idle,
    /// Discussion context read
    ContextLoaded,
    /// Provider stream open, chunks flowing
    Generating,
    /// Persisting the reply
    Finalizing,
    /// Reply persisted
    Completed,
    /// Ended without persisting
    Aborted,
}

impl InteractionState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::ContextLoaded)
                | (Self::ContextLoaded, Self::Generating)
                | (Self::Generating, Self::Finalizing)
                | (Self::Finalizing, Self::Completed)
                | (
                    Self::Idle | Self::ContextLoaded | Self::Generating | Self::Finalizing,
                    Self::Aborted
                )
        )
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ContextLoaded => "context_loaded",
            Self::Generating => "generating",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the state channel of one interaction
pub(crate) struct StateGuard {
    tx: watch::Sender<InteractionState>,
    interaction_id: String,
}

impl StateGuard {
    /// Start in `Idle`; returns the guard and a receiver for observers
    pub(crate) fn new(interaction_id: String) -> (Self, watch::Receiver<InteractionState>) {
        let (tx, rx) = watch::channel(InteractionState::Idle);
        (Self { tx, interaction_id }, rx)
    }

    pub(crate) fn current(&self) -> InteractionState {
        *self.tx.borrow()
    }

    /// Move to `next`; illegal transitions are logged and ignored
    pub(crate) fn advance(&self, next: InteractionState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            warn!(
                interaction_id = %self.interaction_id,
                from = %current,
                to = %next,
                "Ignoring illegal interaction transition"
            );
            return;
        }
        self.tx.send_replace(next);
        debug!(
            interaction_id = %self.interaction_id,
            from = %current,
            to = %next,
            "Interaction state changed"
        );
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if !self.current().is_terminal() {
            self.advance(InteractionState::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use InteractionState::{Completed, ContextLoaded, Finalizing, Generating, Idle};
        let path = [Idle, ContextLoaded, Generating, Finalizing, Completed];
        assert!(path.windows(2).all(|w| w[0].can_transition_to(w[1])));
        assert!(!Completed.can_transition_to(InteractionState::Aborted));
        assert!(!Idle.can_transition_to(Generating));
    }

    #[test]
    fn dropped_guard_marks_aborted() {
        let (guard, rx) = StateGuard::new("i1".to_owned());
        guard.advance(InteractionState::ContextLoaded);
        drop(guard);
        assert_eq!(*rx.borrow(), InteractionState::Aborted);
    }

    #[test]
    fn completed_survives_drop() {
        let (guard, rx) = StateGuard::new("i2".to_owned());
        for next in [
            InteractionState::ContextLoaded,
            InteractionState::Generating,
            InteractionState::Finalizing,
            InteractionState::Completed,
        ] {
            guard.advance(next);
        }
        drop(guard);
        assert_eq!(*rx.borrow(), InteractionState::Completed);
    }
}

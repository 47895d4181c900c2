//! Feedback Annotation Index
//!
//! Read-only derivation of the feedback shown next to each turn. An entry is
//! only valid for the active alternate it was computed from; switching
//! alternates recomputes it.

use crate::alternates::AlternateResponseManager;
use crate::events::ConversationEvent;
use crate::store::ConversationStore;
use crate::turn::{Turn, TurnId};
use std::collections::HashMap;

/// Display annotation for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackAnnotation {
    pub turn_id: TurnId,
    /// Active alternate this entry was derived from
    pub alternate: usize,
    pub feedback: String,
}

/// Turn id -> feedback of its active alternate
#[derive(Debug, Default)]
pub struct FeedbackAnnotationIndex {
    entries: HashMap<TurnId, FeedbackAnnotation>,
}

impl FeedbackAnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feedback attached to the turn's active alternate
    pub fn feedback_for(turn: &Turn) -> Option<&str> {
        AlternateResponseManager::feedback_for(turn, turn.active_alternate)
    }

    /// Recompute the entry for one turn
    pub fn refresh(&mut self, turn: &Turn) -> Option<&FeedbackAnnotation> {
        match Self::feedback_for(turn) {
            Some(feedback) => {
                self.entries.insert(
                    turn.id,
                    FeedbackAnnotation {
                        turn_id: turn.id,
                        alternate: turn.active_alternate,
                        feedback: feedback.to_string(),
                    },
                );
                self.entries.get(&turn.id)
            }
            None => {
                self.entries.remove(&turn.id);
                None
            }
        }
    }

    /// Rebuild every entry
    pub fn rescan(&mut self, turns: &[Turn]) {
        self.entries.clear();
        for turn in turns {
            self.refresh(turn);
        }
    }

    /// Current entry for a turn
    pub fn get(&self, turn_id: TurnId) -> Option<&FeedbackAnnotation> {
        self.entries.get(&turn_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// React to a host or controller event
    pub async fn handle_event(&mut self, event: &ConversationEvent, store: &dyn ConversationStore) {
        match event {
            ConversationEvent::TurnsReloaded => {
                let turns = store.turns().await;
                self.rescan(&turns);
            }
            ConversationEvent::TurnRendered { turn_id }
            | ConversationEvent::AlternateSwitched { turn_id, .. }
            | ConversationEvent::RevisionPending { turn_id, .. }
            | ConversationEvent::RevisionCommitted { turn_id, .. } => {
                match store.turn(*turn_id).await {
                    Some(turn) => {
                        self.refresh(&turn);
                    }
                    None => {
                        self.entries.remove(turn_id);
                    }
                }
            }
            ConversationEvent::RevisionStarted { .. } | ConversationEvent::RevisionFailed { .. } => {}
        }
    }
}

//! Alternate Response Manager
//!
//! Responsibilities:
//! - All structural mutation of a turn's alternate history
//! - Keeping `text` / `annotations` mirrored to the active alternate
//!
//! Revisions are always tail appends. Committed alternates are never removed
//! or rewritten, so alternate 0 keeps the turn's original content.

use crate::turn::{Alternate, AlternateMetadata, Provenance, Turn, TurnAnnotations};
use chrono::Utc;
use thiserror::Error;

/// Alternate history errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlternateError {
    #[error("alternate {index} out of range (turn has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("alternate {0} is already committed")]
    AlreadyCommitted(usize),

    #[error("alternate {0} is still pending")]
    StillPending(usize),

    #[error("alternate {index} is not the last one (turn has {len})")]
    NotTail { index: usize, len: usize },
}

/// Stateless manager over `Turn` alternate history
pub struct AlternateResponseManager;

impl AlternateResponseManager {
    /// Seed alternate 0 from the turn's current text when history is empty,
    /// otherwise repair a loaded record: an out-of-range active index is
    /// clamped and `text` / `annotations` are re-mirrored.
    ///
    /// Safe to call before every mutation.
    pub fn ensure_initialized(turn: &mut Turn) {
        if !turn.alternates.is_empty() {
            let last = turn.alternates.len() - 1;
            if turn.active_alternate > last {
                tracing::warn!(
                    turn_id = turn.id,
                    active = turn.active_alternate,
                    len = turn.alternates.len(),
                    "Active alternate out of range, clamping"
                );
                turn.active_alternate = last;
            }
            Self::sync_active(turn);
            return;
        }

        let now = Utc::now();
        let mut metadata = AlternateMetadata::original(now);
        metadata.feedback = turn.annotations.feedback.clone();
        metadata.reasoning = turn.annotations.reasoning.clone();

        turn.alternates.push(Alternate {
            text: turn.text.clone(),
            metadata,
        });
        turn.active_alternate = 0;
    }

    /// Append a provisional revision alternate and return its index.
    ///
    /// The active alternate is left untouched.
    pub fn begin_pending_alternate(turn: &mut Turn, feedback: &str) -> usize {
        turn.alternates.push(Alternate {
            text: String::new(),
            metadata: AlternateMetadata {
                started_at: Utc::now(),
                finished_at: None,
                provenance: Provenance::Revision,
                feedback: Some(feedback.to_string()),
                reasoning: None,
            },
        });
        turn.alternates.len() - 1
    }

    /// Display a pending alternate before its content has arrived
    pub fn activate_pending(turn: &mut Turn, index: usize) -> Result<(), AlternateError> {
        let alternate = Self::alternate(turn, index)?;
        if !alternate.metadata.is_pending() {
            return Err(AlternateError::AlreadyCommitted(index));
        }
        turn.active_alternate = index;
        Self::sync_active(turn);
        Ok(())
    }

    /// Append streamed content to a pending alternate
    pub fn append_chunk(turn: &mut Turn, index: usize, chunk: &str) -> Result<(), AlternateError> {
        let len = turn.alternates.len();
        let alternate = turn
            .alternates
            .get_mut(index)
            .ok_or(AlternateError::IndexOutOfRange { index, len })?;
        if !alternate.metadata.is_pending() {
            return Err(AlternateError::AlreadyCommitted(index));
        }
        alternate.text.push_str(chunk);
        if turn.active_alternate == index {
            Self::sync_active(turn);
        }
        Ok(())
    }

    /// Fill a pending alternate with its final content and make it active
    pub fn commit_alternate(
        turn: &mut Turn,
        index: usize,
        final_text: &str,
        reasoning: Option<&str>,
    ) -> Result<(), AlternateError> {
        let len = turn.alternates.len();
        let alternate = turn
            .alternates
            .get_mut(index)
            .ok_or(AlternateError::IndexOutOfRange { index, len })?;
        if !alternate.metadata.is_pending() {
            return Err(AlternateError::AlreadyCommitted(index));
        }

        alternate.text = final_text.to_string();
        alternate.metadata.finished_at = Some(Utc::now());
        if let Some(reasoning) = reasoning {
            alternate.metadata.reasoning = Some(reasoning.to_string());
        }

        turn.active_alternate = index;
        Self::sync_active(turn);
        Ok(())
    }

    /// Remove a pending tail alternate and restore the previously active one
    pub fn discard_alternate(
        turn: &mut Turn,
        index: usize,
        previous_active: usize,
    ) -> Result<(), AlternateError> {
        let len = turn.alternates.len();
        if index + 1 != len {
            return Err(AlternateError::NotTail { index, len });
        }
        if !turn.alternates[index].metadata.is_pending() {
            return Err(AlternateError::AlreadyCommitted(index));
        }

        turn.alternates.pop();
        turn.active_alternate = previous_active.min(turn.alternates.len().saturating_sub(1));
        Self::sync_active(turn);
        Ok(())
    }

    /// Append an already generated revision and commit it in one step
    pub fn append_revision(
        turn: &mut Turn,
        feedback: &str,
        text: &str,
        reasoning: Option<&str>,
    ) -> Result<usize, AlternateError> {
        let index = Self::begin_pending_alternate(turn, feedback);
        Self::commit_alternate(turn, index, text, reasoning)?;
        Ok(index)
    }

    /// Switch the displayed alternate (a user "swipe")
    pub fn select_alternate(turn: &mut Turn, index: usize) -> Result<(), AlternateError> {
        let alternate = Self::alternate(turn, index)?;
        if alternate.metadata.is_pending() {
            return Err(AlternateError::StillPending(index));
        }
        turn.active_alternate = index;
        Self::sync_active(turn);
        Ok(())
    }

    /// Feedback that produced alternate `index`, if any
    pub fn feedback_for(turn: &Turn, index: usize) -> Option<&str> {
        turn.alternates
            .get(index)
            .and_then(|alternate| alternate.metadata.feedback.as_deref())
    }

    fn alternate(turn: &Turn, index: usize) -> Result<&Alternate, AlternateError> {
        turn.alternates.get(index).ok_or(AlternateError::IndexOutOfRange {
            index,
            len: turn.alternates.len(),
        })
    }

    fn sync_active(turn: &mut Turn) {
        if let Some(active) = turn.alternates.get(turn.active_alternate) {
            turn.text = active.text.clone();
            turn.annotations = TurnAnnotations::from_metadata(&active.metadata);
        }
    }
}

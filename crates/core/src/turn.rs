//! Conversation turns and their alternate-response history
//!
//! Responsibilities:
//! - Turn / Alternate records and their metadata
//! - Conversation container persisted by stores
//!
//! Alternates are kept as a single sequence of `{text, metadata}` records, so a
//! metadata entry exists for every alternate by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Turn address inside a conversation (its position)
pub type TurnId = usize;

/// Who wrote a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// Where an alternate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// The content the turn was created with
    Original,
    /// Produced from user feedback
    Revision,
}

/// Metadata attached to one alternate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateMetadata {
    /// Generation start
    pub started_at: DateTime<Utc>,

    /// Generation end, unset while the alternate is still pending
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    pub provenance: Provenance,

    /// Feedback that produced this alternate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    /// Auxiliary reasoning returned by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl AlternateMetadata {
    pub fn original(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            finished_at: Some(at),
            provenance: Provenance::Original,
            feedback: None,
            reasoning: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// One candidate text for a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub text: String,
    pub metadata: AlternateMetadata,
}

/// Turn-level copy of the active alternate's annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnAnnotations {
    /// Active alternate came from a revision
    #[serde(default)]
    pub revised: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TurnAnnotations {
    /// Mirror the given alternate's metadata
    pub fn from_metadata(metadata: &AlternateMetadata) -> Self {
        Self {
            revised: metadata.provenance == Provenance::Revision,
            feedback: metadata.feedback.clone(),
            reasoning: metadata.reasoning.clone(),
        }
    }
}

/// One conversational message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,

    pub author: Author,

    /// Speaker display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Displayed content, mirrors the active alternate
    pub text: String,

    /// Alternate history; index 0 is the original content
    #[serde(default)]
    pub alternates: Vec<Alternate>,

    /// Index of the displayed alternate
    #[serde(default)]
    pub active_alternate: usize,

    #[serde(default)]
    pub annotations: TurnAnnotations,
}

impl Turn {
    /// Create a turn holding exactly one (original) alternate
    pub fn new(id: TurnId, author: Author, text: impl Into<String>) -> Self {
        let text = text.into();
        let now = Utc::now();
        Self {
            id,
            author,
            name: None,
            text: text.clone(),
            alternates: vec![Alternate {
                text,
                metadata: AlternateMetadata::original(now),
            }],
            active_alternate: 0,
            annotations: TurnAnnotations::default(),
        }
    }

    pub fn user(id: TurnId, text: impl Into<String>) -> Self {
        Self::new(id, Author::User, text)
    }

    pub fn assistant(id: TurnId, text: impl Into<String>) -> Self {
        Self::new(id, Author::Assistant, text)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.author == Author::Assistant
    }

    /// Currently displayed alternate
    pub fn active(&self) -> Option<&Alternate> {
        self.alternates.get(self.active_alternate)
    }

    /// Original content (alternate 0)
    pub fn original(&self) -> Option<&Alternate> {
        self.alternates.first()
    }

    /// Number of alternates
    pub fn alternate_count(&self) -> usize {
        self.alternates.len()
    }
}

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            title: None,
            turns,
        }
    }

    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    pub fn turn_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|turn| turn.id == id)
    }
}

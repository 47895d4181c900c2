//! inSTead Core - feedback-driven revision of assistant turns
//!
//! Contains:
//! - Turn / Alternate: conversation data model with swipe history
//! - AlternateResponseManager: structural mutation of alternate history
//! - RevisionPromptBuilder: revision instruction construction
//! - RevisionController: single-flight revision workflow
//! - FeedbackAnnotationIndex: per-turn feedback display derivation
//! - ConversationStore / EventBus: host collaborator contracts
//! - LLM provider layer and configuration

mod alternates;
mod annotations;
mod controller;
mod events;
mod prompt;
mod store;
mod turn;

pub mod config;
pub mod llm;

pub use alternates::*;
pub use annotations::*;
pub use controller::*;
pub use events::*;
pub use prompt::*;
pub use store::{ConversationStore, InMemoryConversationStore, StoreError};
pub use turn::*;

pub use config::{ConfigError, ConfigLoader, InsteadConfig, LlmConfig};

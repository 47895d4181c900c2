//! Revision Prompt Builder
//!
//! Builds the self-contained instruction sent to the generation backend for one
//! revision. Pure: no I/O, no conversation history (the backend receives that
//! separately as generation context).

use crate::turn::{Turn, TurnId};
use thiserror::Error;

pub const ORIGINAL_OPEN: &str = "<<<BEGIN ORIGINAL RESPONSE>>>";
pub const ORIGINAL_CLOSE: &str = "<<<END ORIGINAL RESPONSE>>>";
pub const FEEDBACK_OPEN: &str = "<<<BEGIN EDITORIAL FEEDBACK>>>";
pub const FEEDBACK_CLOSE: &str = "<<<END EDITORIAL FEEDBACK>>>";

const DEFAULT_PREAMBLE: &str = "This is a revision task only. Rewrite your previous response \
according to the editorial feedback below. Do not write a new response and do not continue \
the conversation.";

const RULES: &[&str] = &[
    "Revise only the content between the original response markers.",
    "Do not extend the story or content beyond the point where the original response ends.",
    "Do not comment on these instructions, the feedback, or the revision itself.",
    "Keep roughly the same length as the original unless the feedback asks for a different length.",
    "Output only the revised text, without the markers.",
];

/// Prompt build errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("feedback is empty")]
    EmptyFeedback,

    #[error("turn {0} is not an assistant turn")]
    NotAssistant(TurnId),
}

/// Revision prompt builder
#[derive(Debug, Clone, Default)]
pub struct RevisionPromptBuilder {
    /// Replaces the default task statement when set
    preamble: Option<String>,
}

impl RevisionPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom task statement (delimited sections and rules are kept)
    pub fn with_preamble(preamble: Option<String>) -> Self {
        Self {
            preamble: preamble.filter(|p| !p.trim().is_empty()),
        }
    }

    /// Build the revision instruction for the turn's active text
    pub fn build(&self, feedback: &str, target: &Turn) -> Result<String, PromptError> {
        if feedback.trim().is_empty() {
            return Err(PromptError::EmptyFeedback);
        }
        if !target.is_assistant() {
            return Err(PromptError::NotAssistant(target.id));
        }

        let mut prompt = String::new();
        prompt.push_str(self.preamble.as_deref().unwrap_or(DEFAULT_PREAMBLE));
        prompt.push_str("\n\n");

        prompt.push_str("Your previous response was:\n");
        prompt.push_str(ORIGINAL_OPEN);
        prompt.push('\n');
        prompt.push_str(&target.text);
        prompt.push('\n');
        prompt.push_str(ORIGINAL_CLOSE);
        prompt.push_str("\n\n");

        prompt.push_str("The user reviewed it and gave this editorial feedback:\n");
        prompt.push_str(FEEDBACK_OPEN);
        prompt.push('\n');
        prompt.push_str(feedback);
        prompt.push('\n');
        prompt.push_str(FEEDBACK_CLOSE);
        prompt.push_str("\n\n");

        prompt.push_str("Rules:\n");
        for rule in RULES {
            prompt.push_str("- ");
            prompt.push_str(rule);
            prompt.push('\n');
        }

        Ok(prompt)
    }
}

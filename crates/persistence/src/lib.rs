//! inSTead Persistence - conversation files
//!
//! One JSON document per conversation, written atomically
//! (temp file + rename) and re-read on reload.

pub mod json;

pub use json::JsonConversationStore;

//! JSON file conversation store
//!
//! Turns are edited in memory; `persist` writes the whole conversation to a
//! temp file and renames it over the target, `reload` replaces the in-memory
//! copy with what is on disk.

use instead_core::{Conversation, ConversationStore, StoreError, Turn, TurnId};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Conversation store backed by one JSON file
#[derive(Debug)]
pub struct JsonConversationStore {
    path: PathBuf,
    conversation: RwLock<Conversation>,
}

impl JsonConversationStore {
    /// Open an existing conversation file
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let conversation = Self::read(&path).await?;
        tracing::debug!(
            "Opened conversation {} ({} turns) from {}",
            conversation.id,
            conversation.turns.len(),
            path.display()
        );
        Ok(Self {
            path,
            conversation: RwLock::new(conversation),
        })
    }

    /// Write a new conversation file and open it
    pub async fn create(
        path: impl Into<PathBuf>,
        conversation: Conversation,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::write(&path, &conversation).await?;
        Ok(Self {
            path,
            conversation: RwLock::new(conversation),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full in-memory conversation
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    async fn read(path: &Path) -> Result<Conversation, StoreError> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(StoreError::Serialize)
    }

    async fn write(path: &Path, conversation: &Conversation) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(conversation).map_err(StoreError::Serialize)?;

        // Write to a temp file first, then rename over the target (atomic)
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationStore for JsonConversationStore {
    async fn turns(&self) -> Vec<Turn> {
        self.conversation.read().await.turns.clone()
    }

    async fn turn(&self, id: TurnId) -> Option<Turn> {
        self.conversation.read().await.turn(id).cloned()
    }

    async fn update_turn(&self, turn: Turn) -> Result<(), StoreError> {
        let mut conversation = self.conversation.write().await;
        let slot = conversation
            .turn_mut(turn.id)
            .ok_or(StoreError::TurnNotFound(turn.id))?;
        *slot = turn;
        Ok(())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let conversation = self.conversation.read().await;
        Self::write(&self.path, &conversation).await?;
        tracing::debug!("Saved conversation {} to {}", conversation.id, self.path.display());
        Ok(())
    }

    async fn reload(&self) -> Result<(), StoreError> {
        let fresh = Self::read(&self.path).await?;
        *self.conversation.write().await = fresh;
        Ok(())
    }
}

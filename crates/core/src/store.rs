//! Conversation store contract
//!
//! The revision core reads turn snapshots and writes whole turns back; the
//! store decides how and when they reach durable storage.

use crate::turn::{Conversation, Turn, TurnId};
use tokio::sync::RwLock;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Turn not found: {0}")]
    TurnNotFound(TurnId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Conversation store abstraction
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Ordered turn snapshot
    async fn turns(&self) -> Vec<Turn>;

    /// Single turn snapshot
    async fn turn(&self, id: TurnId) -> Option<Turn>;

    /// Replace a turn in memory
    async fn update_turn(&self, turn: Turn) -> Result<()>;

    /// Durably save the conversation
    async fn persist(&self) -> Result<()>;

    /// Re-read the conversation from durable state
    async fn reload(&self) -> Result<()>;
}

/// In-memory store, used when the host owns persistence itself
#[derive(Debug)]
pub struct InMemoryConversationStore {
    conversation: RwLock<Conversation>,
}

impl InMemoryConversationStore {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation: RwLock::new(conversation),
        }
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self::new(Conversation::new(turns))
    }

    /// Full conversation snapshot
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn turns(&self) -> Vec<Turn> {
        self.conversation.read().await.turns.clone()
    }

    async fn turn(&self, id: TurnId) -> Option<Turn> {
        self.conversation.read().await.turn(id).cloned()
    }

    async fn update_turn(&self, turn: Turn) -> Result<()> {
        let mut conversation = self.conversation.write().await;
        let slot = conversation
            .turn_mut(turn.id)
            .ok_or(StoreError::TurnNotFound(turn.id))?;
        *slot = turn;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

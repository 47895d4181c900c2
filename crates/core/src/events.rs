//! Conversation events
//!
//! Publish/subscribe channel between the revision core and the host UI. The host
//! publishes render/reload/switch notifications; the controller publishes
//! revision lifecycle events.

use crate::turn::TurnId;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Events on the conversation bus
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// A turn was (re)rendered by the host
    TurnRendered { turn_id: TurnId },

    /// The whole conversation was reloaded or changed
    TurnsReloaded,

    /// The active alternate of a turn changed
    AlternateSwitched { turn_id: TurnId, index: usize },

    /// A revision attempt passed validation
    RevisionStarted {
        attempt_id: String,
        turn_id: TurnId,
    },

    /// A pending alternate was reserved and displayed (streaming mode)
    RevisionPending {
        attempt_id: String,
        turn_id: TurnId,
        index: usize,
    },

    /// A revision was committed
    RevisionCommitted {
        attempt_id: String,
        turn_id: TurnId,
        index: usize,
    },

    /// A revision attempt failed and was rolled back
    RevisionFailed {
        attempt_id: String,
        turn_id: TurnId,
        reason: String,
    },
}

/// Broadcast bus for conversation events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ConversationEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(
                receivers = self.tx.receiver_count(),
                "Event not delivered: {:?}",
                e.0
            );
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ConversationEvent::TurnRendered { turn_id: 3 });
        bus.publish(ConversationEvent::TurnsReloaded);

        assert_eq!(
            rx.recv().await.unwrap(),
            ConversationEvent::TurnRendered { turn_id: 3 }
        );
        assert_eq!(rx.recv().await.unwrap(), ConversationEvent::TurnsReloaded);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(ConversationEvent::TurnsReloaded);
    }
}

//! Conversation events: decoupled notification of state changes.
//!
//! The controller publishes an event whenever visible state changes. Views
//! subscribe and re-render; nothing in the pipeline depends on a subscriber
//! being present.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::MessageId;
use crate::notice::Notice;

/// Lifecycle of one mounted conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Uninitialized,
    Loading,
    Ready,
}

/// All conversation events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    PhaseChanged { phase: ConversationPhase },

    /// A persisted message became visible
    MessageAdded { id: MessageId },

    /// A streaming reply finished
    StreamingCompleted { id: MessageId },

    ThinkingChanged { thinking: bool },

    /// Compose text or staged attachments changed
    ComposeChanged,

    NoticeRaised { notice: Notice },
}

/// A broadcast-based event bus for conversation events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ConversationEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConversationEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// In-process changefeed for newly inserted messages and changed conversations.
//
// The store publishes a `ChangeEvent` after every successful write; callers
// subscribe to the slice they care about and drop the subscription to stop
// listening.

use tokio::sync::broadcast;
use tracing::warn;

use crate::model::{Conversation, Message};

/// Default number of buffered events per subscriber before it starts lagging.
pub const DEFAULT_CAPACITY: usize = 256;

/// A row-level change published by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    MessageInserted(Message),
    ConversationInserted(Conversation),
    ConversationUpdated(Conversation),
}

/// Fan-out point for change events.
#[derive(Debug, Clone)]
pub struct Changefeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Changefeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Changefeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe to messages inserted into one conversation.
    pub fn subscribe_messages(&self, conversation_id: &str) -> MessageSubscription {
        MessageSubscription {
            rx: self.tx.subscribe(),
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Subscribe to inserts and updates of one user's conversations.
    pub fn subscribe_conversations(&self, user_id: &str) -> ConversationSubscription {
        ConversationSubscription {
            rx: self.tx.subscribe(),
            user_id: user_id.to_string(),
        }
    }
}

/// Yields each message inserted into the subscribed conversation.
pub struct MessageSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    conversation_id: String,
}

impl MessageSubscription {
    /// Wait for the next matching message. Returns `None` once the feed is
    /// closed.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(ChangeEvent::MessageInserted(msg))
                    if msg.conversation_id == self.conversation_id =>
                {
                    return Some(msg);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        conversation_id = %self.conversation_id,
                        "message subscription lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Yields the conversation row whenever one of the user's conversations is
/// created or updated.
pub struct ConversationSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    user_id: String,
}

impl ConversationSubscription {
    pub async fn next(&mut self) -> Option<Conversation> {
        loop {
            match self.rx.recv().await {
                Ok(ChangeEvent::ConversationInserted(conv))
                | Ok(ChangeEvent::ConversationUpdated(conv))
                    if conv.user_id == self.user_id =>
                {
                    return Some(conv);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, user_id = %self.user_id, "conversation subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

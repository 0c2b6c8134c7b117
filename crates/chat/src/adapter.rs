//! Message store adapter: rows in, messages out.
//!
//! Translates between the record store's flat row shape and the in-memory
//! [`Message`] model. Every store failure comes back as
//! [`ChatError::StoreUnavailable`]; nothing is retried here.

use std::sync::Arc;

use chatdeck_core::error::{ChatError, Result};
use chatdeck_core::identity::Identity;
use chatdeck_core::message::{Attachment, Message, MessageDraft, MessageId, MessageKind};
use chatdeck_core::store::{MessageRecordStore, MessageRow, NewMessageRow};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MessageStoreAdapter {
    store: Arc<dyn MessageRecordStore>,
}

impl MessageStoreAdapter {
    pub fn new(store: Arc<dyn MessageRecordStore>) -> Self {
        Self { store }
    }

    /// All messages owned by `identity`, ascending by `created_at`.
    pub async fn load_conversation(&self, identity: &Identity) -> Result<Vec<Message>> {
        let rows = self.store.select_messages(&identity.id).await.map_err(|e| {
            warn!(user_id = %identity.id, error = %e, "Failed to load conversation");
            ChatError::from(e)
        })?;

        let mut messages: Vec<Message> = rows.into_iter().filter_map(row_to_message).collect();
        // Stable sort, so equal timestamps keep the store's arrival order
        messages.sort_by_key(|m| m.created_at);
        debug!(user_id = %identity.id, count = messages.len(), "Loaded conversation");
        Ok(messages)
    }

    /// Persist a draft and return it as stored, with its server-assigned id and timestamp.
    pub async fn append_message(&self, identity: &Identity, draft: MessageDraft) -> Result<Message> {
        let kind = draft.kind;
        let row = draft_to_row(identity, draft)?;
        let stored = self.store.insert_message(row).await.map_err(|e| {
            warn!(user_id = %identity.id, kind = kind.as_str(), error = %e, "Failed to save message");
            ChatError::from(e)
        })?;

        // The canonical row is the source of truth, so it must parse
        row_to_message(stored).ok_or_else(|| {
            ChatError::StoreUnavailable("store returned an unreadable message row".into())
        })
    }

    /// Clear the streaming flag of a stored message. Safe to call repeatedly.
    pub async fn mark_streaming_complete(&self, id: &MessageId) -> Result<()> {
        self.store.update_streaming(id.as_str(), false).await.map_err(|e| {
            warn!(message_id = %id, error = %e, "Failed to clear streaming flag");
            ChatError::from(e)
        })
    }
}

fn draft_to_row(identity: &Identity, draft: MessageDraft) -> Result<NewMessageRow> {
    let attachments = serde_json::to_value(&draft.attachments)
        .map_err(|e| ChatError::StoreUnavailable(format!("attachments not serializable: {e}")))?;
    Ok(NewMessageRow {
        user_id: identity.id.clone(),
        content: draft.body,
        kind: draft.kind.as_str().to_string(),
        attachments,
        // Only assistant messages stream
        is_streaming: draft.streaming && draft.kind == MessageKind::Assistant,
    })
}

fn row_to_message(row: MessageRow) -> Option<Message> {
    let Some(kind) = MessageKind::parse(&row.kind) else {
        warn!(message_id = %row.id, kind = %row.kind, "Skipping row with unknown kind");
        return None;
    };

    let attachments: Vec<Attachment> = match row.attachments {
        serde_json::Value::Null => Vec::new(),
        value => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(message_id = %row.id, error = %e, "Ignoring malformed attachments");
            Vec::new()
        }),
    };

    Some(Message {
        id: MessageId(row.id),
        owner_id: row.user_id,
        kind,
        body: row.content,
        created_at: row.created_at,
        attachments,
        streaming: kind == MessageKind::Assistant && row.is_streaming.unwrap_or(false),
    })
}

//! Record store traits: durable storage of messages and profiles.
//!
//! The store speaks in rows: a flat shape keyed by owner id with a JSON
//! column for attachments. Translation to [`crate::Message`] happens in the
//! chat crate's adapter, not here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::identity::{NewProfile, Profile, UserId};

/// A stored message row, exactly as the record store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub user_id: UserId,
    pub content: String,

    /// "user" or "assistant"
    #[serde(rename = "type")]
    pub kind: String,

    /// Nested attachment descriptors
    #[serde(default)]
    pub attachments: serde_json::Value,

    #[serde(default)]
    pub is_streaming: Option<bool>,

    pub created_at: DateTime<Utc>,
}

/// Insert shape for a message row. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessageRow {
    pub user_id: UserId,
    pub content: String,
    pub kind: String,
    pub attachments: serde_json::Value,
    pub is_streaming: bool,
}

/// The external message record store.
#[async_trait]
pub trait MessageRecordStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a row and return the canonical stored row.
    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, StoreError>;

    /// All rows owned by `owner`, ascending by `created_at`, ties in insertion order.
    async fn select_messages(&self, owner: &UserId) -> Result<Vec<MessageRow>, StoreError>;

    /// Patch the streaming flag of one row.
    async fn update_streaming(&self, id: &str, streaming: bool) -> Result<(), StoreError>;
}

/// The external profile store. At most one row per owner.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, owner: &UserId) -> Result<Option<Profile>, StoreError>;

    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, StoreError>;
}

//! In-memory record store: useful for testing and ephemeral sessions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chatdeck_core::error::StoreError;
use chatdeck_core::identity::{NewProfile, Profile, UserId};
use chatdeck_core::store::{MessageRecordStore, MessageRow, NewMessageRow, ProfileStore};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Stores message and profile rows in `Vec`s.
///
/// Failure switches let tests drive every error path of the pipeline.
pub struct InMemoryStore {
    messages: RwLock<Vec<MessageRow>>,
    profiles: RwLock<Vec<Profile>>,
    fail_inserts: AtomicUsize,
    fail_loads: AtomicBool,
    fail_updates: AtomicBool,
    fail_profiles: AtomicBool,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            profiles: RwLock::new(Vec::new()),
            fail_inserts: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_profiles: AtomicBool::new(false),
            insert_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` message inserts.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_profiles(&self, fail: bool) {
        self.fail_profiles.store(fail, Ordering::SeqCst);
    }

    /// Number of `insert_message` calls, failed ones included.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of `update_streaming` calls, failed ones included.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored message row.
    pub async fn rows(&self) -> Vec<MessageRow> {
        self.messages.read().await.clone()
    }

    fn take_insert_failure(&self) -> bool {
        self.fail_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRecordStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_insert_failure() {
            return Err(StoreError::Unavailable("insert rejected".into()));
        }

        let mut messages = self.messages.write().await;
        // Timestamps never go backwards, even if the wall clock does
        let now = Utc::now();
        let created_at = messages
            .last()
            .map(|last| last.created_at.max(now))
            .unwrap_or(now);

        let stored = MessageRow {
            id: Uuid::new_v4().to_string(),
            user_id: row.user_id,
            content: row.content,
            kind: row.kind,
            attachments: row.attachments,
            is_streaming: Some(row.is_streaming),
            created_at,
        };
        messages.push(stored.clone());
        debug!(message_id = %stored.id, "Stored message row");
        Ok(stored)
    }

    async fn select_messages(&self, owner: &UserId) -> Result<Vec<MessageRow>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("select rejected".into()));
        }
        let mut rows: Vec<MessageRow> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|r| &r.user_id == owner)
            .cloned()
            .collect();
        // Stable: ties stay in insertion order
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn update_streaming(&self, id: &str, streaming: bool) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update rejected".into()));
        }
        let mut messages = self.messages.write().await;
        let row = messages
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.is_streaming = Some(streaming);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get_profile(&self, owner: &UserId) -> Result<Option<Profile>, StoreError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile lookup rejected".into()));
        }
        let profiles = self.profiles.read().await;
        Ok(profiles.iter().find(|p| &p.auth_id == owner).cloned())
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile insert rejected".into()));
        }
        let mut profiles = self.profiles.write().await;
        if let Some(existing) = profiles.iter().find(|p| p.auth_id == profile.auth_id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let stored = Profile {
            id: Uuid::new_v4().to_string(),
            auth_id: profile.auth_id,
            email: profile.email,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            settings: profile.settings,
            api_keys: profile.api_keys,
            created_at: now,
            updated_at: now,
        };
        profiles.push(stored.clone());
        Ok(stored)
    }
}

//! Identity and profile types.
//!
//! An [`Identity`] is the authenticated user a conversation belongs to. It is
//! bound 1:1 to a [`Profile`] row, created on first successful sign-in when
//! absent and never deleted by the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque user identifier issued by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signed-in user as seen by the conversation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
}

/// Stored per-user profile.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,

    /// The identity this profile belongs to
    pub auth_id: UserId,

    pub email: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,

    /// Free-form nested settings
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,

    /// Per-user key-value secrets (API keys)
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted: Vec<&str> = self.api_keys.keys().map(String::as_str).collect();
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("auth_id", &self.auth_id)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("avatar_url", &self.avatar_url)
            .field("settings", &self.settings)
            .field("api_keys", &redacted)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Insert shape for a profile row. Nested maps default to empty.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub auth_id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub api_keys: BTreeMap<String, String>,
}

impl NewProfile {
    /// Profile for a first-time identity, carrying over the auth metadata.
    pub fn for_identity(
        identity: &Identity,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Self {
        Self {
            auth_id: identity.id.clone(),
            email: identity.email.clone(),
            display_name,
            avatar_url,
            settings: serde_json::Map::new(),
            api_keys: BTreeMap::new(),
        }
    }
}

//! Transient user-facing notices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A recoverable failure surfaced to the user instead of crashing the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: String,
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, "Error", description)
    }

    pub fn warning(description: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, "Warning", description)
    }
}

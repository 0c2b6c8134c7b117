//! Message and Attachment domain types.
//!
//! These are the value objects that flow through the pipeline:
//! user types a message → draft is persisted → the stored row comes back as a
//! [`Message`] with a server-assigned id and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// Server-assigned message identifier. Stable and unique within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// The signed-in human
    User,
    /// The simulated assistant
    Assistant,
}

impl MessageKind {
    /// Wire name used in stored rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored row's kind column.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Whether an attachment is displayed as an image or a generic file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    /// Classify from a MIME type: anything under `image/` is an image.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

/// Descriptive shape of a file attached to a message.
///
/// Only this shape is stored with the message; the bytes never are.
/// `locator` is an ephemeral local reference and is meaningless once the
/// view that created it is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(rename = "url")]
    pub locator: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

impl Attachment {
    /// Size in kilobytes, as shown next to the file name.
    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,

    /// The identity whose conversation this message belongs to
    pub owner_id: UserId,

    pub kind: MessageKind,

    pub body: String,

    /// Server-assigned creation time
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// True while the simulated reply is still "being produced"
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.kind == MessageKind::User
    }
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub kind: MessageKind,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub streaming: bool,
}

impl MessageDraft {
    /// Draft for a user turn.
    pub fn user(body: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            kind: MessageKind::User,
            body: body.into(),
            attachments,
            streaming: false,
        }
    }

    /// Draft for an assistant turn. Only assistant drafts may stream.
    pub fn assistant(body: impl Into<String>, streaming: bool) -> Self {
        Self {
            kind: MessageKind::Assistant,
            body: body.into(),
            attachments: Vec::new(),
            streaming,
        }
    }
}

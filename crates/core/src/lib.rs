//! # chatdeck Core
//!
//! Domain types, collaborator traits, and error definitions for the chatdeck
//! conversation pipeline. This crate has **no framework dependencies**: it
//! defines the model that the store backends and the chat controller are
//! written against.
//!
//! ## Collaborators
//!
//! Identity issuance and durable storage live outside the pipeline. They are
//! reached only through the narrow traits defined here:
//! - [`AuthService`] for sessions (sign-in, sign-up, sign-out, state changes)
//! - [`ProfileStore`] for per-user profile rows
//! - [`MessageRecordStore`] for chat message rows

pub mod auth;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod notice;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use auth::{AuthService, AuthStateChange, AuthUser, Session};
pub use error::{AuthError, ChatError, Result, StoreError};
pub use event::{ConversationEvent, ConversationPhase, EventBus};
pub use identity::{Identity, NewProfile, Profile, UserId};
pub use message::{Attachment, AttachmentKind, Message, MessageDraft, MessageId, MessageKind};
pub use notice::{Notice, NoticeLevel};
pub use store::{MessageRecordStore, MessageRow, NewMessageRow, ProfileStore};

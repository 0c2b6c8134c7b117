//! The chatdeck conversation pipeline.
//!
//! A mounted conversation moves through **Uninitialized → Loading → Ready**:
//!
//! 1. **Session** resolves an identity from the auth collaborator
//! 2. **Load** fetches the identity's messages in `created_at` order
//! 3. **Bootstrap** inserts a one-shot welcome message into an empty conversation
//! 4. **Send** persists the user's turn, then a simulated assistant reply
//!    appears after a thinking delay and stops streaming after a second delay
//!
//! Every delayed step is tied to the mount's cancellation token, so nothing
//! mutates state after the view is torn down.

pub mod adapter;
pub mod controller;
pub mod locator;
pub mod replies;
pub mod session;
pub mod staging;
pub mod view;

pub use adapter::MessageStoreAdapter;
pub use controller::{
    ChatSettings, ChatSnapshot, ConversationController, Key, KeyInput, ReplyTask, SendOutcome,
    SentTurn,
};
pub use locator::LocatorRegistry;
pub use replies::{FALLBACK_REPLY, ReplyRule, ReplyTable, WELCOME_MESSAGE};
pub use session::{SessionManager, SessionSnapshot};
pub use staging::{AttachmentStaging, FileDescriptor};
pub use view::{ChatView, IntentOutcome, ViewIntent, render_messages};

//! Record store and auth backends for chatdeck.
//!
//! These are the concrete collaborators behind the core traits. The chat
//! pipeline never depends on a backend directly.

pub mod auth;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use auth::InMemoryAuth;
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

//! Error types for the chatdeck domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; [`ChatError`] is the taxonomy
//! the conversation pipeline reports in.

use thiserror::Error;

/// Failures reported by the pipeline itself.
///
/// None of these are fatal: callers convert them into user-facing notices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Session resolution failed; the identity is treated as signed out.
    #[error("Authentication service unavailable: {0}")]
    AuthUnavailable(String),

    /// The profile could not be loaded or created; the identity stays usable.
    #[error("Profile load failed: {0}")]
    ProfileLoadFailed(String),

    /// A conversation load, append or update did not complete.
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    /// Send attempted with empty text and no staged attachments.
    #[error("Nothing to send")]
    ValidationNoop,
}

/// Result type alias using [`ChatError`].
pub type Result<T> = std::result::Result<T, ChatError>;

// --- Collaborator errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Auth service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account already exists for {0}")]
    AlreadyRegistered(String),

    #[error("No active session")]
    NotSignedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Unavailable(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Malformed row: {0}")]
    Malformed(String),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

impl From<AuthError> for ChatError {
    fn from(err: AuthError) -> Self {
        ChatError::AuthUnavailable(err.to_string())
    }
}

//! In-memory auth backend and the session plumbing shared with SQLite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chatdeck_core::auth::{AuthService, AuthStateChange, AuthUser, Session};
use chatdeck_core::error::AuthError;
use chatdeck_core::identity::UserId;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

/// Salted SHA-256 of a password, hex encoded.
pub(crate) fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if !email.contains('@') || password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(())
}

/// The current session plus the change feed subscribers listen on.
pub(crate) struct SessionSlot {
    current: RwLock<Option<Session>>,
    changes: broadcast::Sender<AuthStateChange>,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            current: RwLock::new(None),
            changes,
        }
    }

    pub(crate) async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }

    pub(crate) async fn open(&self, user: AuthUser) {
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            user,
        };
        *self.current.write().await = Some(session.clone());
        debug!(user_id = %session.user.id, "Session opened");
        let _ = self.changes.send(AuthStateChange::SignedIn(session));
    }

    pub(crate) async fn close(&self) {
        let previous = self.current.write().await.take();
        if let Some(session) = previous {
            debug!(user_id = %session.user.id, "Session closed");
        }
        let _ = self.changes.send(AuthStateChange::SignedOut);
    }
}

struct Account {
    user: AuthUser,
    salt: String,
    password_hash: String,
}

/// An in-memory auth service. Accounts and the session live for the
/// lifetime of the value.
pub struct InMemoryAuth {
    accounts: RwLock<HashMap<String, Account>>,
    session: SessionSlot,
    fail_get_session: AtomicBool,
}

impl InMemoryAuth {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            session: SessionSlot::new(),
            fail_get_session: AtomicBool::new(false),
        }
    }

    /// Register an account without opening a session.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        validate_credentials(email, password)?;
        let key = normalize_email(email);
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            return Err(AuthError::AlreadyRegistered(key));
        }

        let salt = Uuid::new_v4().to_string();
        let user = AuthUser {
            id: UserId(Uuid::new_v4().to_string()),
            email: key.clone(),
            display_name: None,
            avatar_url: None,
        };
        accounts.insert(
            key,
            Account {
                user: user.clone(),
                password_hash: hash_password(&salt, password),
                salt,
            },
        );
        info!(user_id = %user.id, "Account registered");
        Ok(user)
    }

    /// Make `get_session` fail, simulating an unreachable service.
    pub fn set_fail_get_session(&self, fail: bool) {
        self.fail_get_session.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for InMemoryAuth {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable("session lookup failed".into()));
        }
        Ok(self.session.current().await)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.session.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let key = normalize_email(email);
        let user = {
            let accounts = self.accounts.read().await;
            let account = accounts.get(&key).ok_or(AuthError::InvalidCredentials)?;
            if hash_password(&account.salt, password) != account.password_hash {
                return Err(AuthError::InvalidCredentials);
            }
            account.user.clone()
        };
        self.session.open(user).await;
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let user = self.register(email, password).await?;
        self.session.open(user).await;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.close().await;
        Ok(())
    }
}

//! Session manager: one explicitly owned context for "who is signed in".
//!
//! Construct it, call [`SessionManager::init`] once, and
//! [`SessionManager::teardown`] when done. In between it mirrors the auth
//! collaborator's state into a [`watch`] snapshot and a de-duplicated
//! stream of identity transitions.

use std::sync::{Arc, Mutex};

use chatdeck_core::auth::{AuthService, AuthUser, Session};
use chatdeck_core::error::{AuthError, ChatError};
use chatdeck_core::identity::{Identity, NewProfile, Profile};
use chatdeck_core::store::ProfileStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// True until the startup session has been resolved.
    pub loading: bool,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            loading: true,
            identity: None,
            profile: None,
        }
    }
}

struct SessionInner {
    auth: Arc<dyn AuthService>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<SessionSnapshot>,
    identities: broadcast::Sender<Option<Identity>>,
    cancel: CancellationToken,
}

pub struct SessionManager {
    inner: Arc<SessionInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthService>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let (identities, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(SessionInner {
                auth,
                profiles,
                state,
                identities,
                cancel: CancellationToken::new(),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Resolve the startup session and start following auth changes.
    ///
    /// Returns once `loading` is false. Calling it again is a no-op.
    pub async fn init(&self) {
        if self.lock_listener().is_some() {
            return;
        }

        // Subscribe before resolving so no transition slips between the two
        let mut changes = self.inner.auth.subscribe();
        self.inner.refresh().await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => inner.apply(change.session().cloned()).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Auth listener lagged, re-resolving session");
                            inner.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Session listener stopped");
        });
        *self.lock_listener() = Some(handle);
        info!(auth = self.inner.auth.name(), "Session manager initialized");
    }

    /// Stop following auth changes. The last snapshot stays readable.
    pub fn teardown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Identity transitions. `None` means definitely signed out.
    pub fn on_identity_change(&self) -> broadcast::Receiver<Option<Identity>> {
        self.inner.identities.subscribe()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.inner.auth.sign_in(email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.inner.auth.sign_up(email, password).await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.auth.sign_out().await
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl SessionInner {
    async fn refresh(&self) {
        let session = match self.auth.get_session().await {
            Ok(session) => session,
            Err(e) => {
                let err = ChatError::from(e);
                warn!(error = %err, "Treating session as signed out");
                None
            }
        };
        self.apply(session).await;
    }

    async fn apply(&self, session: Option<Session>) {
        let identity = session.as_ref().map(|s| s.user.identity());
        {
            let current = self.state.borrow();
            let same = current.identity.as_ref().map(|i| &i.id) == identity.as_ref().map(|i| &i.id);
            if !current.loading && same {
                debug!("Ignoring repeated session snapshot");
                return;
            }
        }

        let profile = match &session {
            Some(session) => self.resolve_profile(&session.user).await,
            None => None,
        };

        match &identity {
            Some(identity) => info!(user_id = %identity.id, "Signed in"),
            None => info!("Signed out"),
        }
        self.state.send_replace(SessionSnapshot {
            loading: false,
            identity: identity.clone(),
            profile,
        });
        let _ = self.identities.send(identity);
    }

    /// Load the profile, creating it on first sign-in. Failure leaves it unset.
    async fn resolve_profile(&self, user: &AuthUser) -> Option<Profile> {
        let identity = user.identity();
        let result = match self.profiles.get_profile(&identity.id).await {
            Ok(Some(profile)) => Ok(profile),
            Ok(None) => {
                let new = NewProfile::for_identity(
                    &identity,
                    user.display_name.clone(),
                    user.avatar_url.clone(),
                );
                self.profiles.create_profile(new).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(profile) => Some(profile),
            Err(e) => {
                let err = ChatError::ProfileLoadFailed(e.to_string());
                warn!(user_id = %identity.id, error = %err, "Continuing without profile");
                None
            }
        }
    }
}

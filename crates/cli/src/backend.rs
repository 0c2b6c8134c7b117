//! Collaborator wiring for the configured store backend.

use std::sync::Arc;
use std::time::Duration;

use chatdeck_chat::SessionManager;
use chatdeck_config::StoreConfig;
use chatdeck_core::auth::AuthService;
use chatdeck_core::identity::Identity;
use chatdeck_core::store::{MessageRecordStore, ProfileStore};
use chatdeck_store::{InMemoryAuth, InMemoryStore, SqliteStore};
use tracing::info;

const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Backend {
    pub auth: Arc<dyn AuthService>,
    pub profiles: Arc<dyn ProfileStore>,
    pub messages: Arc<dyn MessageRecordStore>,
    pub description: String,
}

pub async fn open(config: &StoreConfig) -> Result<Backend, Box<dyn std::error::Error>> {
    match config.backend.as_str() {
        "in_memory" => {
            let store = Arc::new(InMemoryStore::new());
            Ok(Backend {
                auth: Arc::new(InMemoryAuth::new()),
                profiles: store.clone(),
                messages: store,
                description: "in_memory (nothing is kept after exit)".into(),
            })
        }
        _ => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = Arc::new(SqliteStore::new(&format!("sqlite://{}", path.display())).await?);
            info!(path = %path.display(), "Opened SQLite store");
            Ok(Backend {
                auth: store.clone(),
                profiles: store.clone(),
                messages: store,
                description: format!("sqlite ({})", path.display()),
            })
        }
    }
}

/// Sign in (or up) and wait for the session manager to pick up the identity.
pub async fn authenticate(
    session: &SessionManager,
    email: &str,
    password: &str,
    sign_up: bool,
) -> Result<Identity, Box<dyn std::error::Error>> {
    let mut changes = session.watch();
    if sign_up {
        session.sign_up(email, password).await?;
    } else {
        session.sign_in(email, password).await?;
    }

    let resolved = async {
        loop {
            if let Some(identity) = session.current_identity() {
                return Some(identity);
            }
            if changes.changed().await.is_err() {
                return None;
            }
        }
    };
    tokio::time::timeout(SIGN_IN_TIMEOUT, resolved)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| "Signed in, but the session never became active".into())
}

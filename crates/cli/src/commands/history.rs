//! `chatdeck history`: print a stored conversation without mounting it.

use chatdeck_chat::{MessageStoreAdapter, SessionManager, render_messages};
use chatdeck_config::AppConfig;

use crate::Credentials;
use crate::backend;

pub async fn run(credentials: Credentials) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backend = backend::open(&config.store).await?;

    let session = SessionManager::new(backend.auth.clone(), backend.profiles.clone());
    session.init().await;
    let identity =
        backend::authenticate(&session, &credentials.email, &credentials.password, false).await?;

    // Loading through the adapter skips the welcome bootstrap
    let adapter = MessageStoreAdapter::new(backend.messages.clone());
    let messages = adapter.load_conversation(&identity).await?;

    if messages.is_empty() {
        println!("No messages for {}.", identity.email);
    } else {
        print!("{}", render_messages(&config.chat.assistant_name, &messages));
        println!("{} messages", messages.len());
    }

    session.teardown();
    Ok(())
}

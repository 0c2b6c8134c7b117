//! `chatdeck chat`: interactive conversation on stdin/stdout.
//!
//! Each line is one Enter press. Lines starting with `/` are commands.

use std::path::Path;
use std::sync::Arc;

use chatdeck_chat::view::THINKING_TEXT;
use chatdeck_chat::{
    ChatSettings, ChatView, ConversationController, FileDescriptor, IntentOutcome, SendOutcome,
    SessionManager, ViewIntent,
};
use chatdeck_config::AppConfig;
use chatdeck_core::event::{ConversationEvent, ConversationPhase};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::Credentials;
use crate::backend;

pub async fn run(credentials: Credentials, sign_up: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backend = backend::open(&config.store).await?;

    let session = SessionManager::new(backend.auth.clone(), backend.profiles.clone());
    session.init().await;
    let identity =
        backend::authenticate(&session, &credentials.email, &credentials.password, sign_up)
            .await
            .map_err(|e| format!("Sign-in failed: {e}"))?;

    let controller = ConversationController::new(
        backend.messages.clone(),
        ChatSettings::from_config(&config.chat),
    );
    let mut events = controller.subscribe();
    let follower = controller.follow_session(&session);

    // Wait for the initial load
    while controller.phase().await != ConversationPhase::Ready {
        if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
            return Err("Conversation closed before it loaded".into());
        }
    }

    let view = ChatView::new(controller.clone());
    println!();
    println!("  chatdeck: signed in as {}", identity.email);
    println!("  Store:    {}", backend.description);
    println!();
    println!("  Type a message and press Enter.");
    println!("  /attach <path>  /detach <id>  /show  /notices  /dismiss <id>  /logout  /quit");
    println!();

    let snapshot = controller.snapshot().await;
    for notice in &snapshot.notices {
        eprintln!("  ! {}: {}", notice.title, notice.description);
    }
    print!("{}", view.render_messages(&snapshot.messages));

    // Picks up right after the load, so the welcome message is printed too
    let printer = tokio::spawn(print_events(ChatView::new(controller.clone()), events));

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end().to_string();
        match line.split_once(' ').unwrap_or((line.as_str(), "")) {
            ("/quit" | "/exit" | ":q", _) => break,
            ("/logout", _) => {
                session.sign_out().await?;
                println!("  Signed out.");
                break;
            }
            ("/attach", path) if !path.trim().is_empty() => {
                match FileDescriptor::from_path(Path::new(path.trim())) {
                    Ok(file) => {
                        if let IntentOutcome::Attached(a) = view.dispatch(ViewIntent::Attach(file)).await {
                            println!("  + {} ({:.1}KB) #{}", a.name, a.size_kb(), a.id);
                        }
                    }
                    Err(e) => eprintln!("  Cannot attach {}: {e}", path.trim()),
                }
            }
            ("/attach", _) => eprintln!("  Usage: /attach <path>"),
            ("/detach", id) => match view.dispatch(ViewIntent::RemoveAttachment(id.trim().into())).await {
                IntentOutcome::Unknown => eprintln!("  No staged attachment {}", id.trim()),
                _ => println!("  Removed {}", id.trim()),
            },
            ("/dismiss", id) => {
                view.dispatch(ViewIntent::DismissNotice(id.trim().into())).await;
            }
            ("/notices", _) => {
                let notices = controller.snapshot().await.notices;
                if notices.is_empty() {
                    println!("  No notices.");
                }
                for notice in notices {
                    println!("  {} {}: {}", notice.id, notice.title, notice.description);
                }
            }
            ("/show", _) => print!("{}", view.render_current().await),
            _ => {
                // An empty line retries whatever is still in the compose box
                if !line.trim().is_empty() {
                    view.dispatch(ViewIntent::Type(line.clone())).await;
                }
                match view.dispatch(ViewIntent::Send).await {
                    IntentOutcome::Send(SendOutcome::Ignored) => {}
                    IntentOutcome::Send(SendOutcome::Failed(e)) => {
                        eprintln!("  Not sent ({e}). Your text is kept; press Enter on an empty line to retry.");
                    }
                    _ => {}
                }
            }
        }
    }

    printer.abort();
    controller.shutdown().await;
    let _ = follower.await;
    session.teardown();

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Print assistant messages and notices as they arrive.
async fn print_events(view: ChatView, mut events: broadcast::Receiver<Arc<ConversationEvent>>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event.as_ref() {
            ConversationEvent::MessageAdded { id } => {
                let messages = view.controller().messages().await;
                if let Some(message) = messages.iter().find(|m| &m.id == id && !m.is_user()) {
                    print!("{}", view.render_message(message));
                }
            }
            ConversationEvent::ThinkingChanged { thinking: true } => eprintln!("  {THINKING_TEXT}"),
            ConversationEvent::NoticeRaised { notice } => {
                eprintln!("  ! {}: {}", notice.title, notice.description);
            }
            _ => {}
        }
    }
}

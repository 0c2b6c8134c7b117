//! Plain-text chat view.
//!
//! `render` is a pure function of a [`ChatSnapshot`]. User intents are
//! forwarded to the controller unchanged; the only logic here is echoing
//! whether send is enabled.

use std::fmt::Write as _;

use chatdeck_core::event::ConversationPhase;
use chatdeck_core::message::{Attachment, AttachmentKind, Message};
use chrono::Local;

use crate::controller::{ChatSnapshot, ConversationController, KeyInput, SendOutcome};
use crate::staging::FileDescriptor;

pub const LOADING_TEXT: &str = "Loading chat history...";
pub const EMPTY_TITLE: &str = "Welcome to chatdeck";
pub const EMPTY_SUBTITLE: &str = "Start a conversation with your AI assistant";
pub const THINKING_TEXT: &str = "Thinking...";
const STREAMING_MARKER: &str = "…";

/// Something the user did in the view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewIntent {
    /// Replace the compose text.
    Type(String),
    Send,
    Key(KeyInput),
    Attach(FileDescriptor),
    RemoveAttachment(String),
    DismissNotice(String),
}

#[derive(Debug)]
pub enum IntentOutcome {
    Handled,
    Attached(Attachment),
    Send(SendOutcome),
    /// The referenced attachment or notice does not exist.
    Unknown,
}

pub struct ChatView {
    controller: ConversationController,
    assistant_name: String,
}

impl ChatView {
    pub fn new(controller: ConversationController) -> Self {
        let assistant_name = controller.settings().assistant_name.clone();
        Self {
            controller,
            assistant_name,
        }
    }

    pub fn controller(&self) -> &ConversationController {
        &self.controller
    }

    pub async fn dispatch(&self, intent: ViewIntent) -> IntentOutcome {
        match intent {
            ViewIntent::Type(text) => {
                self.controller.set_compose(text).await;
                IntentOutcome::Handled
            }
            ViewIntent::Send => IntentOutcome::Send(self.controller.send().await),
            ViewIntent::Key(input) => match self.controller.handle_key(input).await {
                Some(outcome) => IntentOutcome::Send(outcome),
                None => IntentOutcome::Handled,
            },
            ViewIntent::Attach(file) => IntentOutcome::Attached(self.controller.attach(file).await),
            ViewIntent::RemoveAttachment(id) => {
                found(self.controller.remove_attachment(&id).await)
            }
            ViewIntent::DismissNotice(id) => found(self.controller.dismiss_notice(&id).await),
        }
    }

    pub async fn render_current(&self) -> String {
        self.render(&self.controller.snapshot().await)
    }

    pub fn render(&self, snapshot: &ChatSnapshot) -> String {
        let mut out = String::new();

        for notice in &snapshot.notices {
            let _ = writeln!(out, "! {}: {}", notice.title, notice.description);
        }

        match snapshot.phase {
            ConversationPhase::Uninitialized => {}
            ConversationPhase::Loading => {
                let _ = writeln!(out, "{LOADING_TEXT}");
            }
            ConversationPhase::Ready if snapshot.messages.is_empty() => {
                let _ = writeln!(out, "{EMPTY_TITLE}");
                let _ = writeln!(out, "{EMPTY_SUBTITLE}");
            }
            ConversationPhase::Ready => out.push_str(&self.render_messages(&snapshot.messages)),
        }

        if snapshot.thinking {
            let _ = writeln!(out, "{}: {THINKING_TEXT}", self.assistant_name);
        }

        render_compose(&mut out, snapshot);
        out
    }

    pub fn render_messages(&self, messages: &[Message]) -> String {
        render_messages(&self.assistant_name, messages)
    }

    pub fn render_message(&self, message: &Message) -> String {
        render_message(&self.assistant_name, message)
    }
}

/// Render a transcript without a controller behind it.
pub fn render_messages(assistant_name: &str, messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| render_message(assistant_name, m))
        .collect()
}

/// Header, attachment rows and indented body, followed by a blank line.
pub fn render_message(assistant_name: &str, message: &Message) -> String {
    let mut out = String::new();
    let author = if message.is_user() { "You" } else { assistant_name };
    let time = message.created_at.with_timezone(&Local).format("%H:%M:%S");
    let marker = if message.streaming {
        format!(" {STREAMING_MARKER}")
    } else {
        String::new()
    };
    let _ = writeln!(out, "{author} [{time}]{marker}");
    for attachment in &message.attachments {
        let _ = writeln!(out, "  {}", attachment_row(attachment));
    }
    for line in message.body.lines() {
        let _ = writeln!(out, "  {line}");
    }
    out.push('\n');
    out
}

fn found(hit: bool) -> IntentOutcome {
    if hit {
        IntentOutcome::Handled
    } else {
        IntentOutcome::Unknown
    }
}

fn attachment_row(attachment: &Attachment) -> String {
    let tag = match attachment.kind {
        AttachmentKind::Image => "[image]",
        AttachmentKind::File => "[file]",
    };
    format!("{tag} {} ({:.1}KB)", attachment.name, attachment.size_kb())
}

fn render_compose(out: &mut String, snapshot: &ChatSnapshot) {
    if snapshot.phase == ConversationPhase::Uninitialized {
        return;
    }
    for attachment in &snapshot.staged {
        let _ = writeln!(out, "+ {} #{}", attachment_row(attachment), attachment.id);
    }
    let state = if snapshot.send_enabled {
        "send"
    } else {
        "send disabled"
    };
    let _ = writeln!(out, "> {} ({state})", snapshot.compose);
}

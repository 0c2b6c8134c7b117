//! Conversation controller.
//!
//! Owns the view state of one mounted conversation and drives it through
//! `Uninitialized → Loading → Ready`. Every delayed step (welcome, thinking,
//! streaming completion) runs as a spawned task holding a [`Lease`]: the
//! identity generation plus a child cancellation token. A task whose lease is
//! no longer live never touches view state, but a row it already persisted
//! still gets its streaming flag cleared. Reloading the same identity keeps
//! the lease, so pending replies survive it.
//!
//! Welcome appends and conversation loads are serialized through one gate.
//! A load therefore either sees a committed welcome row or runs before the
//! welcome task checks the list, which keeps the bootstrap to one row.
//!
//! Late results are always placed by `created_at` and matched by message id,
//! so interleaved pipelines from concurrent sends cannot corrupt the list.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chatdeck_config::ChatConfig;
use chatdeck_core::error::ChatError;
use chatdeck_core::event::{ConversationEvent, ConversationPhase, EventBus};
use chatdeck_core::identity::{Identity, UserId};
use chatdeck_core::message::{Attachment, Message, MessageDraft, MessageId};
use chatdeck_core::notice::{Notice, NoticeLevel};
use chatdeck_core::store::MessageRecordStore;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::MessageStoreAdapter;
use crate::locator::LocatorRegistry;
use crate::replies::{ReplyTable, WELCOME_MESSAGE};
use crate::session::{SessionManager, SessionSnapshot};
use crate::staging::{AttachmentStaging, FileDescriptor};

/// Timing and content knobs for a controller.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub welcome_delay: Duration,
    pub thinking_delay: Duration,
    pub streaming_delay: Duration,
    pub max_notices: usize,
    pub assistant_name: String,
    pub welcome_message: String,
    pub replies: ReplyTable,
}

impl ChatSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            welcome_delay: Duration::from_millis(config.welcome_delay_ms),
            thinking_delay: Duration::from_millis(config.thinking_delay_ms),
            streaming_delay: Duration::from_millis(config.streaming_delay_ms),
            max_notices: config.max_notices,
            assistant_name: config.assistant_name.clone(),
            welcome_message: config
                .welcome_message
                .clone()
                .unwrap_or_else(|| WELCOME_MESSAGE.to_string()),
            replies: ReplyTable::from_config(config),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

// ── Compose input ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub shift: bool,
}

impl KeyInput {
    pub fn plain(key: Key) -> Self {
        Self { key, shift: false }
    }

    pub fn shifted(key: Key) -> Self {
        Self { key, shift: true }
    }
}

// ── Send results ──

/// Handle to the assistant half of a send.
#[derive(Debug)]
pub struct ReplyTask {
    handle: Option<JoinHandle<Option<MessageId>>>,
}

impl ReplyTask {
    fn spawned(handle: JoinHandle<Option<MessageId>>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn detached() -> Self {
        Self { handle: None }
    }

    /// Wait for the pipeline to finish, including streaming completion.
    ///
    /// Returns the reply's id, or `None` if no reply was shown.
    pub async fn wait(self) -> Option<MessageId> {
        match self.handle {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

#[derive(Debug)]
pub struct SentTurn {
    /// The user message as persisted.
    pub message: Message,
    pub reply: ReplyTask,
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Nothing to send, or no conversation is ready. No store call was made.
    Ignored,
    /// The user message was not persisted. Compose state is untouched.
    Failed(ChatError),
    Sent(SentTurn),
}

impl SendOutcome {
    pub fn sent(self) -> Option<SentTurn> {
        match self {
            Self::Sent(turn) => Some(turn),
            _ => None,
        }
    }
}

/// Everything a view needs to draw one frame.
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub phase: ConversationPhase,
    pub identity: Option<Identity>,
    pub messages: Vec<Message>,
    pub thinking: bool,
    pub compose: String,
    pub staged: Vec<Attachment>,
    pub notices: Vec<Notice>,
    /// False when a send would be a no-op.
    pub send_enabled: bool,
}

// ── State ──

#[derive(Clone)]
struct Lease {
    generation: u64,
    token: CancellationToken,
}

struct ConversationState {
    phase: ConversationPhase,
    identity: Option<Identity>,
    lease: Lease,
    /// Bumped per load; only the newest load may land.
    load_seq: u64,
    messages: Vec<Message>,
    in_flight: usize,
    compose: String,
    staging: AttachmentStaging,
    notices: VecDeque<Notice>,
    sent_locators: Vec<String>,
}

impl ConversationState {
    fn is_live(&self, lease: &Lease) -> bool {
        self.lease.generation == lease.generation && !lease.token.is_cancelled()
    }

    fn has_content(&self) -> bool {
        !self.compose.trim().is_empty() || !self.staging.is_empty()
    }
}

struct Inner {
    adapter: MessageStoreAdapter,
    settings: ChatSettings,
    locators: Arc<LocatorRegistry>,
    state: Mutex<ConversationState>,
    events: EventBus,
    root: CancellationToken,
    welcome_gate: Mutex<()>,
}

/// Drives one conversation at a time. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationController {
    inner: Arc<Inner>,
}

impl ConversationController {
    pub fn new(store: Arc<dyn MessageRecordStore>, settings: ChatSettings) -> Self {
        let locators = Arc::new(LocatorRegistry::new());
        let root = CancellationToken::new();
        let state = ConversationState {
            phase: ConversationPhase::Uninitialized,
            identity: None,
            lease: Lease {
                generation: 0,
                token: root.child_token(),
            },
            load_seq: 0,
            messages: Vec::new(),
            in_flight: 0,
            compose: String::new(),
            staging: AttachmentStaging::new(locators.clone()),
            notices: VecDeque::new(),
            sent_locators: Vec::new(),
        };
        Self {
            inner: Arc::new(Inner {
                adapter: MessageStoreAdapter::new(store),
                settings,
                locators,
                state: Mutex::new(state),
                events: EventBus::default(),
                root,
                welcome_gate: Mutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.inner.settings
    }

    pub fn locators(&self) -> &Arc<LocatorRegistry> {
        &self.inner.locators
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConversationEvent>> {
        self.inner.events.subscribe()
    }

    // ── Lifecycle ──

    /// Load `identity`'s conversation, replacing whatever was mounted.
    ///
    /// Returns once the conversation is `Ready`. A failed load still lands
    /// in `Ready` with an empty list and a notice. Mounting the identity that
    /// is already mounted reloads it without cancelling pending replies.
    pub async fn mount(&self, identity: Identity) {
        let (lease, seq) = {
            let mut state = self.inner.state.lock().await;
            let same_identity = state.identity.as_ref().map(|i| &i.id) == Some(&identity.id);
            if !same_identity {
                self.inner.release(&mut state);
                self.inner.begin_generation(&mut state);
            }
            state.identity = Some(identity.clone());
            state.load_seq += 1;
            self.inner.set_phase(&mut state, ConversationPhase::Loading);
            (state.lease.clone(), state.load_seq)
        };
        info!(user_id = %identity.id, generation = lease.generation, "Mounting conversation");

        let _gate = self.inner.welcome_gate.lock().await;
        let loaded = self.inner.adapter.load_conversation(&identity).await;

        let schedule_welcome = {
            let mut state = self.inner.state.lock().await;
            if !state.is_live(&lease) || state.load_seq != seq {
                debug!(user_id = %identity.id, "Load superseded, discarding");
                return;
            }
            let empty = match loaded {
                Ok(messages) => {
                    let local = std::mem::take(&mut state.messages);
                    state.messages = merge_loaded(local, messages);
                    state.messages.is_empty()
                }
                Err(err) => {
                    state.messages.clear();
                    self.inner.push_notice(
                        &mut state,
                        Notice::new(NoticeLevel::Error, "Failed to load chat history", err.to_string()),
                    );
                    false
                }
            };
            self.inner.set_phase(&mut state, ConversationPhase::Ready);
            empty
        };

        if schedule_welcome {
            tokio::spawn(self.clone().welcome(identity, lease));
        }
    }

    /// Re-run the load for the mounted identity. Compose state is kept.
    pub async fn reload(&self) {
        let identity = self.inner.state.lock().await.identity.clone();
        if let Some(identity) = identity {
            self.mount(identity).await;
        }
    }

    /// Tear down the mounted conversation.
    ///
    /// Pending timers are cancelled and every locator this conversation
    /// still holds is revoked.
    pub async fn unmount(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(identity) = &state.identity {
            info!(user_id = %identity.id, "Unmounting conversation");
        }
        self.inner.release(&mut state);
        self.inner.begin_generation(&mut state);
        state.identity = None;
        self.inner.set_phase(&mut state, ConversationPhase::Uninitialized);
    }

    /// Unmount and stop every task this controller spawned.
    pub async fn shutdown(&self) {
        self.unmount().await;
        self.inner.root.cancel();
    }

    /// Mount and unmount as the session's identity changes.
    pub fn follow_session(&self, session: &SessionManager) -> JoinHandle<()> {
        let mut snapshots = session.watch();
        let this = self.clone();
        tokio::spawn(async move {
            let mut current: Option<UserId> = None;
            let first = snapshots.borrow_and_update().clone();
            this.track(&mut current, first).await;
            loop {
                tokio::select! {
                    _ = this.inner.root.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        this.track(&mut current, snapshot).await;
                    }
                }
            }
            debug!("Stopped following session");
        })
    }

    async fn track(&self, current: &mut Option<UserId>, snapshot: SessionSnapshot) {
        if snapshot.loading {
            return;
        }
        match snapshot.identity {
            Some(identity) if current.as_ref() != Some(&identity.id) => {
                *current = Some(identity.id.clone());
                self.mount(identity).await;
            }
            None if current.is_some() => {
                *current = None;
                self.unmount().await;
            }
            _ => {}
        }
    }

    // ── Compose ──

    pub async fn set_compose(&self, text: impl Into<String>) {
        let mut state = self.inner.state.lock().await;
        state.compose = text.into();
        self.inner.events.publish(ConversationEvent::ComposeChanged);
    }

    /// Stage a file for the next send.
    pub async fn attach(&self, file: FileDescriptor) -> Attachment {
        let mut state = self.inner.state.lock().await;
        let attachment = state.staging.add(file);
        self.inner.events.publish(ConversationEvent::ComposeChanged);
        attachment
    }

    pub async fn remove_attachment(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let removed = state.staging.remove(id).is_some();
        if removed {
            self.inner.events.publish(ConversationEvent::ComposeChanged);
        }
        removed
    }

    /// Enter without Shift sends. Returns the outcome when a send happened.
    pub async fn handle_key(&self, input: KeyInput) -> Option<SendOutcome> {
        match input.key {
            Key::Enter if !input.shift => Some(self.send().await),
            Key::Enter => {
                self.push_compose('\n').await;
                None
            }
            Key::Char(c) => {
                self.push_compose(c).await;
                None
            }
            Key::Other => None,
        }
    }

    async fn push_compose(&self, c: char) {
        let mut state = self.inner.state.lock().await;
        state.compose.push(c);
        self.inner.events.publish(ConversationEvent::ComposeChanged);
    }

    pub async fn dismiss_notice(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let before = state.notices.len();
        state.notices.retain(|n| n.id != id);
        state.notices.len() != before
    }

    // ── Send ──

    /// Persist the compose text and staged attachments as a user message,
    /// then start the assistant reply pipeline.
    pub async fn send(&self) -> SendOutcome {
        let (identity, lease, text, attachments) = {
            let state = self.inner.state.lock().await;
            let Some(identity) = state.identity.clone() else {
                debug!("Send ignored, no conversation mounted");
                return SendOutcome::Ignored;
            };
            if state.phase != ConversationPhase::Ready {
                debug!(user_id = %identity.id, "Send ignored, conversation still loading");
                return SendOutcome::Ignored;
            }
            if !state.has_content() {
                return SendOutcome::Ignored;
            }
            (
                identity,
                state.lease.clone(),
                state.compose.clone(),
                state.staging.items().to_vec(),
            )
        };

        let ids: Vec<String> = attachments.iter().map(|a| a.id.clone()).collect();
        let draft = MessageDraft::user(text.clone(), attachments);
        let message = match self.inner.adapter.append_message(&identity, draft).await {
            Ok(message) => message,
            Err(err) => {
                let mut state = self.inner.state.lock().await;
                if state.is_live(&lease) {
                    self.inner.push_notice(
                        &mut state,
                        Notice::new(NoticeLevel::Error, "Failed to save message", err.to_string()),
                    );
                }
                return SendOutcome::Failed(err);
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            if !state.is_live(&lease) {
                debug!(message_id = %message.id, "Sent after unmount, skipping reply");
                return SendOutcome::Sent(SentTurn {
                    message,
                    reply: ReplyTask::detached(),
                });
            }
            self.inner.insert_message(&mut state, message.clone());

            // Text typed while the append was pending stays in the box
            if state.compose == text {
                state.compose.clear();
            }
            let sent = state.staging.take(&ids);
            state.sent_locators.extend(sent.into_iter().map(|a| a.locator));
            self.inner.events.publish(ConversationEvent::ComposeChanged);

            state.in_flight += 1;
            if state.in_flight == 1 {
                self.inner
                    .events
                    .publish(ConversationEvent::ThinkingChanged { thinking: true });
            }
        }
        debug!(user_id = %identity.id, message_id = %message.id, "User message sent");

        let handle = tokio::spawn(self.clone().reply(identity, lease, text));
        SendOutcome::Sent(SentTurn {
            message,
            reply: ReplyTask::spawned(handle),
        })
    }

    // ── Delayed tasks ──

    async fn welcome(self, identity: Identity, lease: Lease) {
        if !sleep_or_cancel(&lease.token, self.inner.settings.welcome_delay).await {
            return;
        }
        // Held until the row is in the list, so a concurrent load waits for it
        let _gate = self.inner.welcome_gate.lock().await;
        {
            let state = self.inner.state.lock().await;
            if !state.is_live(&lease)
                || state.phase != ConversationPhase::Ready
                || !state.messages.is_empty()
            {
                return;
            }
        }

        let draft = MessageDraft::assistant(self.inner.settings.welcome_message.clone(), false);
        match self.inner.adapter.append_message(&identity, draft).await {
            Ok(message) => {
                let mut state = self.inner.state.lock().await;
                if state.is_live(&lease) {
                    self.inner.insert_message(&mut state, message);
                }
            }
            // Cosmetic, so no notice and no retry
            Err(err) => debug!(user_id = %identity.id, error = %err, "Welcome message dropped"),
        }
    }

    async fn reply(self, identity: Identity, lease: Lease, prompt: String) -> Option<MessageId> {
        let inner = &self.inner;
        if !sleep_or_cancel(&lease.token, inner.settings.thinking_delay).await {
            return None;
        }

        let body = inner.settings.replies.reply_for(&prompt).to_string();
        let saved = inner
            .adapter
            .append_message(&identity, MessageDraft::assistant(body, true))
            .await;

        let id = {
            let mut state = inner.state.lock().await;
            if !state.is_live(&lease) {
                drop(state);
                if let Ok(message) = saved {
                    // Nobody will stream it, so complete the stored row now
                    let _ = inner.adapter.mark_streaming_complete(&message.id).await;
                }
                return None;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.in_flight == 0 {
                inner
                    .events
                    .publish(ConversationEvent::ThinkingChanged { thinking: false });
            }
            match saved {
                Ok(message) => {
                    let id = message.id.clone();
                    inner.insert_message(&mut state, message);
                    id
                }
                Err(err) => {
                    inner.push_notice(
                        &mut state,
                        Notice::new(NoticeLevel::Error, "Failed to save message", err.to_string()),
                    );
                    return None;
                }
            }
        };

        let on_time = sleep_or_cancel(&lease.token, inner.settings.streaming_delay).await;
        // The stored flag is cleared even if the view is gone
        let cleared = inner.adapter.mark_streaming_complete(&id).await;
        if !on_time {
            return Some(id);
        }

        let mut state = inner.state.lock().await;
        if !state.is_live(&lease) {
            return Some(id);
        }
        if let Err(err) = cleared {
            inner.push_notice(
                &mut state,
                Notice::new(NoticeLevel::Warning, "Failed to complete response", err.to_string()),
            );
        }
        // Local state wins over a failed remote update
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
            if message.streaming {
                message.streaming = false;
                inner
                    .events
                    .publish(ConversationEvent::StreamingCompleted { id: id.clone() });
            }
        }
        Some(id)
    }

    // ── Reads ──

    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.inner.state.lock().await;
        ChatSnapshot {
            phase: state.phase,
            identity: state.identity.clone(),
            messages: state.messages.clone(),
            thinking: state.in_flight > 0,
            compose: state.compose.clone(),
            staged: state.staging.items().to_vec(),
            notices: state.notices.iter().cloned().collect(),
            send_enabled: state.phase == ConversationPhase::Ready && state.has_content(),
        }
    }

    pub async fn phase(&self) -> ConversationPhase {
        self.inner.state.lock().await.phase
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn is_thinking(&self) -> bool {
        self.inner.state.lock().await.in_flight > 0
    }
}

impl Inner {
    /// Invalidate every outstanding lease and issue a fresh one.
    fn begin_generation(&self, state: &mut ConversationState) {
        state.lease.token.cancel();
        state.lease = Lease {
            generation: state.lease.generation + 1,
            token: self.root.child_token(),
        };
        if state.in_flight > 0 {
            state.in_flight = 0;
            self.events
                .publish(ConversationEvent::ThinkingChanged { thinking: false });
        }
    }

    /// Drop everything tied to the current identity.
    fn release(&self, state: &mut ConversationState) {
        state.lease.token.cancel();
        for locator in state.sent_locators.drain(..) {
            self.locators.revoke(&locator);
        }
        for attachment in state.staging.drain_all() {
            self.locators.revoke(&attachment.locator);
        }
        state.messages.clear();
        state.compose.clear();
        state.notices.clear();
    }

    fn set_phase(&self, state: &mut ConversationState, phase: ConversationPhase) {
        if state.phase != phase {
            state.phase = phase;
            self.events.publish(ConversationEvent::PhaseChanged { phase });
        }
    }

    fn insert_message(&self, state: &mut ConversationState, message: Message) {
        let id = message.id.clone();
        if insert_ordered(&mut state.messages, message) {
            self.events.publish(ConversationEvent::MessageAdded { id });
        }
    }

    fn push_notice(&self, state: &mut ConversationState, notice: Notice) {
        warn!(title = %notice.title, description = %notice.description, "Notice raised");
        state.notices.push_back(notice.clone());
        while state.notices.len() > self.settings.max_notices.max(1) {
            state.notices.pop_front();
        }
        self.events.publish(ConversationEvent::NoticeRaised { notice });
    }
}

/// Fold the local list into a fresh load of the same conversation.
///
/// Messages are append-only, so anything held locally but missing from the
/// load landed after the load read the store. A local completion wins over a
/// stored flag that is still set.
fn merge_loaded(local: Vec<Message>, mut loaded: Vec<Message>) -> Vec<Message> {
    for message in local {
        match loaded.iter_mut().find(|m| m.id == message.id) {
            Some(stored) => stored.streaming &= message.streaming,
            None => {
                insert_ordered(&mut loaded, message);
            }
        }
    }
    loaded
}

/// Insert after the last message not newer than `message`. Duplicate ids are dropped.
fn insert_ordered(messages: &mut Vec<Message>, message: Message) -> bool {
    if messages.iter().any(|m| m.id == message.id) {
        return false;
    }
    let at = messages.partition_point(|m| m.created_at <= message.created_at);
    messages.insert(at, message);
    true
}

/// Sleep for `delay`. Returns false if the token fired first.
async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

//! End-to-end conversation tests against the in-memory collaborators.
//!
//! Time is paused, so the welcome, thinking and streaming delays elapse
//! deterministically as the tests sleep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatdeck_chat::{
    ChatSettings, ConversationController, FileDescriptor, SendOutcome, SessionManager,
    WELCOME_MESSAGE,
};
use chatdeck_core::error::{ChatError, StoreError};
use chatdeck_core::event::{ConversationEvent, ConversationPhase};
use chatdeck_core::identity::{Identity, UserId};
use chatdeck_core::message::{Message, MessageKind};
use chatdeck_core::notice::NoticeLevel;
use chatdeck_core::store::{MessageRecordStore, MessageRow, NewMessageRow};
use chatdeck_store::{InMemoryAuth, InMemoryStore};
use tokio::time::sleep;

// ── Helpers ──────────────────────────────────────────────────────────────

fn identity(id: &str) -> Identity {
    Identity {
        id: UserId::from(id),
        email: format!("{id}@example.com"),
    }
}

fn setup() -> (ConversationController, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let controller = ConversationController::new(store.clone(), ChatSettings::default());
    (controller, store)
}

/// Mount `U1` and let the welcome message land.
async fn mounted() -> (ConversationController, Arc<InMemoryStore>) {
    let (controller, store) = setup();
    controller.mount(identity("U1")).await;
    sleep(Duration::from_millis(600)).await;
    assert_eq!(controller.messages().await.len(), 1);
    (controller, store)
}

/// Holds back inserts of one row kind so a test can act while they are pending.
struct SlowInserts {
    inner: Arc<InMemoryStore>,
    kind: &'static str,
    delay: Duration,
}

#[async_trait]
impl MessageRecordStore for SlowInserts {
    fn name(&self) -> &str {
        "slow_inserts"
    }

    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, StoreError> {
        if row.kind == self.kind {
            sleep(self.delay).await;
        }
        self.inner.insert_message(row).await
    }

    async fn select_messages(&self, owner: &UserId) -> Result<Vec<MessageRow>, StoreError> {
        self.inner.select_messages(owner).await
    }

    async fn update_streaming(&self, id: &str, streaming: bool) -> Result<(), StoreError> {
        self.inner.update_streaming(id, streaming).await
    }
}

/// Assistant inserts take 100ms.
fn slow_assistant_setup() -> (ConversationController, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let slow = Arc::new(SlowInserts {
        inner: store.clone(),
        kind: "assistant",
        delay: Duration::from_millis(100),
    });
    let controller = ConversationController::new(slow, ChatSettings::default());
    (controller, store)
}

fn welcome_rows(rows: &[MessageRow]) -> usize {
    rows.iter()
        .filter(|r| r.kind == "assistant" && r.content == WELCOME_MESSAGE)
        .count()
}

fn index_of(events: &[Arc<ConversationEvent>], pred: impl Fn(&ConversationEvent) -> bool) -> usize {
    events
        .iter()
        .position(|e| pred(e.as_ref()))
        .expect("event not published")
}

fn assert_sorted(messages: &[Message]) {
    assert!(
        messages
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at),
        "messages out of order"
    );
}

// ── Bootstrap ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_conversation_gets_welcome_after_bootstrap_window() {
    let (controller, store) = setup();
    controller.mount(identity("U1")).await;

    assert_eq!(controller.phase().await, ConversationPhase::Ready);
    assert!(controller.messages().await.is_empty());

    sleep(Duration::from_millis(499)).await;
    assert!(controller.messages().await.is_empty());

    sleep(Duration::from_millis(101)).await;
    let messages = controller.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::Assistant);
    assert_eq!(messages[0].body, WELCOME_MESSAGE);
    assert!(!messages[0].streaming);
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reloading_non_empty_conversation_never_rewelcomes() {
    let (controller, store) = mounted().await;

    controller.reload().await;
    sleep(Duration::from_secs(2)).await;
    controller.reload().await;
    sleep(Duration::from_secs(2)).await;

    assert_eq!(controller.messages().await.len(), 1);
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn remount_within_window_welcomes_once() {
    let (controller, store) = setup();
    controller.mount(identity("U1")).await;
    sleep(Duration::from_millis(200)).await;
    // The second welcome timer finds the list already filled
    controller.mount(identity("U1")).await;
    sleep(Duration::from_secs(2)).await;

    assert_eq!(controller.messages().await.len(), 1);
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_during_welcome_append_writes_one_welcome() {
    let (controller, store) = slow_assistant_setup();
    controller.mount(identity("U1")).await;

    // The welcome insert is pending between 500ms and 600ms
    sleep(Duration::from_millis(550)).await;
    controller.reload().await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(welcome_rows(&store.rows().await), 1);
    assert_eq!(store.insert_calls(), 1);
    let messages = controller.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, WELCOME_MESSAGE);

    controller.reload().await;
    assert_eq!(controller.messages().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn remount_during_welcome_append_writes_one_welcome() {
    let (controller, store) = slow_assistant_setup();
    controller.mount(identity("U1")).await;

    sleep(Duration::from_millis(550)).await;
    controller.unmount().await;
    controller.mount(identity("U1")).await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(welcome_rows(&store.rows().await), 1);
    assert_eq!(store.insert_calls(), 1);
    assert_eq!(controller.messages().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_welcome_is_silent() {
    let (controller, store) = setup();
    store.fail_next_inserts(1);
    controller.mount(identity("U1")).await;
    sleep(Duration::from_secs(1)).await;

    let snapshot = controller.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.notices.is_empty());
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn load_failure_lands_ready_with_notice() {
    let (controller, store) = setup();
    store.set_fail_loads(true);
    controller.mount(identity("U1")).await;
    sleep(Duration::from_secs(1)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, ConversationPhase::Ready);
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.notices.len(), 1);
    assert_eq!(snapshot.notices[0].title, "Failed to load chat history");
    assert_eq!(snapshot.notices[0].level, NoticeLevel::Error);
    // No welcome on top of a conversation that failed to load
    assert_eq!(store.insert_calls(), 0);
}

// ── Send pipeline ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn theme_request_streams_then_completes() {
    let (controller, store) = mounted().await;
    controller.set_compose("change the color scheme").await;

    let turn = controller.send().await.sent().unwrap();
    assert_eq!(turn.message.kind, MessageKind::User);
    let snapshot = controller.snapshot().await;
    assert!(snapshot.thinking);
    assert!(snapshot.compose.is_empty());
    assert_eq!(snapshot.messages.len(), 2);

    sleep(Duration::from_millis(1001)).await;
    let snapshot = controller.snapshot().await;
    assert!(!snapshot.thinking);
    let reply = snapshot.messages.last().unwrap().clone();
    assert_eq!(reply.kind, MessageKind::Assistant);
    assert!(reply.body.contains("color scheme"));
    assert!(reply.streaming);

    sleep(Duration::from_millis(2000)).await;
    let messages = controller.messages().await;
    let completed = messages.iter().find(|m| m.id == reply.id).unwrap();
    assert!(!completed.streaming);
    assert_eq!(messages.len(), 3);

    let rows = store.rows().await;
    let row = rows.iter().find(|r| r.id == reply.id.as_str()).unwrap();
    assert_eq!(row.is_streaming, Some(false));
    assert_eq!(turn.reply.wait().await, Some(reply.id));
}

#[tokio::test(start_paused = true)]
async fn append_failure_preserves_compose() {
    let (controller, store) = mounted().await;
    controller.set_compose("keep me").await;
    controller.attach(FileDescriptor::new("notes.pdf", 4096)).await;
    store.fail_next_inserts(1);

    let outcome = controller.send().await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed(ChatError::StoreUnavailable(_))
    ));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.compose, "keep me");
    assert_eq!(snapshot.staged.len(), 1);
    assert_eq!(snapshot.messages.len(), 1);
    assert!(!snapshot.thinking);
    assert_eq!(snapshot.notices.len(), 1);
    assert_eq!(snapshot.notices[0].title, "Failed to save message");

    // The user can simply try again
    let turn = controller.send().await.sent().unwrap();
    assert_eq!(turn.message.body, "keep me");
    assert_eq!(turn.message.attachments.len(), 1);
    let snapshot = controller.snapshot().await;
    assert!(snapshot.compose.is_empty());
    assert!(snapshot.staged.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sequential_sends_alternate_user_and_assistant() {
    let (controller, _) = mounted().await;

    for prompt in ["deploy it", "make it responsive", "anything else"] {
        controller.set_compose(prompt).await;
        let turn = controller.send().await.sent().unwrap();
        assert!(turn.reply.wait().await.is_some());
    }

    let messages = controller.messages().await;
    assert_eq!(messages.len(), 7);
    assert_sorted(&messages);
    for pair in messages[1..].chunks(2) {
        assert_eq!(pair[0].kind, MessageKind::User);
        assert_eq!(pair[1].kind, MessageKind::Assistant);
        assert!(!pair[1].streaming);
    }
    assert_eq!(
        messages[6].body,
        "I understand your request. Let me work on that for you..."
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_complete_independently() {
    let (controller, store) = mounted().await;

    controller.set_compose("add a login page").await;
    let first = controller.send().await.sent().unwrap();
    sleep(Duration::from_millis(300)).await;
    controller.set_compose("add an animation").await;
    let second = controller.send().await.sent().unwrap();

    let a = first.reply.wait().await.unwrap();
    // The second pipeline is still streaming when the first is done
    assert!(!second.reply.is_finished());
    let b = second.reply.wait().await.unwrap();
    assert_ne!(a, b);

    let messages = controller.messages().await;
    assert_eq!(messages.len(), 5);
    assert_sorted(&messages);
    assert!(messages.iter().all(|m| !m.streaming));
    assert!(!controller.is_thinking().await);
    assert_eq!(store.insert_calls(), 5);

    let replies: Vec<&str> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Assistant)
        .skip(1)
        .map(|m| m.body.as_str())
        .collect();
    assert!(replies[0].contains("authentication"));
    assert!(replies[1].contains("animations"));
}

#[tokio::test(start_paused = true)]
async fn streaming_clear_failure_still_completes_locally() {
    let (controller, store) = mounted().await;
    store.set_fail_updates(true);

    controller.set_compose("help").await;
    let turn = controller.send().await.sent().unwrap();
    let id = turn.reply.wait().await.unwrap();

    let snapshot = controller.snapshot().await;
    let reply = snapshot.messages.iter().find(|m| m.id == id).unwrap();
    assert!(!reply.streaming);
    assert_eq!(snapshot.notices.len(), 1);
    assert_eq!(snapshot.notices[0].title, "Failed to complete response");
    assert_eq!(snapshot.notices[0].level, NoticeLevel::Warning);

    let rows = store.rows().await;
    let row = rows.iter().find(|r| r.id == id.as_str()).unwrap();
    assert_eq!(row.is_streaming, Some(true));
}

#[tokio::test(start_paused = true)]
async fn reply_persist_failure_ends_thinking_with_notice() {
    let (controller, store) = mounted().await;
    controller.set_compose("hello").await;
    let turn = controller.send().await.sent().unwrap();
    store.fail_next_inserts(1);

    assert_eq!(turn.reply.wait().await, None);
    let snapshot = controller.snapshot().await;
    assert!(!snapshot.thinking);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.notices.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_attachments_keep_distinct_ids_through_send() {
    let (controller, _) = mounted().await;

    let mut ids = Vec::new();
    for i in 0..10 {
        let file = FileDescriptor::new(format!("shot-{i}.png"), 100).with_mime("image/png");
        ids.push(controller.attach(file).await.id);
    }
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);

    let turn = controller.send().await.sent().unwrap();
    let sent: Vec<String> = turn.message.attachments.iter().map(|a| a.id.clone()).collect();
    assert_eq!(sent, ids);
    assert!(turn.message.body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn noop_send_touches_nothing() {
    let (controller, store) = mounted().await;
    let mut events = controller.subscribe();
    let before = store.insert_calls();

    controller.set_compose("  ").await;
    let _ = events.recv().await.unwrap();
    let snapshot = controller.snapshot().await;

    assert!(matches!(controller.send().await, SendOutcome::Ignored));
    assert_eq!(store.insert_calls(), before);
    let after = controller.snapshot().await;
    assert_eq!(after.messages, snapshot.messages);
    assert_eq!(after.compose, snapshot.compose);
    assert!(events.try_recv().is_err());
}

// ── Lifecycle ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unmount_before_reply_discards_pipeline() {
    let (controller, store) = mounted().await;
    controller.set_compose("change the theme").await;
    let turn = controller.send().await.sent().unwrap();

    sleep(Duration::from_millis(400)).await;
    controller.unmount().await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(turn.reply.wait().await, None);
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, ConversationPhase::Uninitialized);
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.thinking);
    // Welcome and the user turn only
    assert_eq!(store.insert_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn reload_during_reply_append_keeps_the_reply() {
    let (controller, store) = slow_assistant_setup();
    controller.mount(identity("U1")).await;
    sleep(Duration::from_millis(700)).await;
    assert_eq!(controller.messages().await.len(), 1);

    controller.set_compose("change the color scheme").await;
    let turn = controller.send().await.sent().unwrap();
    // Thinking ends at 1000ms, the reply insert lands at 1100ms
    sleep(Duration::from_millis(1050)).await;
    controller.reload().await;
    sleep(Duration::from_secs(10)).await;

    let id = turn.reply.wait().await.unwrap();
    let messages = controller.messages().await;
    assert_eq!(messages.len(), 3);
    assert_sorted(&messages);
    let reply = messages.iter().find(|m| m.id == id).unwrap();
    assert!(reply.body.contains("color scheme"));
    assert!(!reply.streaming);
    assert!(!controller.is_thinking().await);

    let rows = store.rows().await;
    assert!(rows.iter().all(|r| r.is_streaming != Some(true)));
    assert_eq!(store.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_during_thinking_keeps_the_reply() {
    let (controller, store) = mounted().await;
    controller.set_compose("deploy it").await;
    let turn = controller.send().await.sent().unwrap();

    sleep(Duration::from_millis(400)).await;
    controller.reload().await;
    assert!(controller.is_thinking().await);

    let id = turn.reply.wait().await.unwrap();
    let messages = controller.messages().await;
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().any(|m| m.id == id && !m.streaming));
    assert_eq!(store.insert_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_reply_append_still_completes_stored_row() {
    let (controller, store) = slow_assistant_setup();
    controller.mount(identity("U1")).await;
    sleep(Duration::from_millis(700)).await;

    controller.set_compose("change the color scheme").await;
    let turn = controller.send().await.sent().unwrap();
    sleep(Duration::from_millis(1050)).await;
    controller.unmount().await;
    sleep(Duration::from_secs(10)).await;

    assert_eq!(turn.reply.wait().await, None);
    assert!(controller.messages().await.is_empty());

    let rows = store.rows().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.is_streaming != Some(true)));
    assert_eq!(store.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn switching_identity_isolates_conversations() {
    let (controller, _) = mounted().await;
    controller.set_compose("from U1").await;
    controller.send().await.sent().unwrap().reply.wait().await;

    controller.mount(identity("U2")).await;
    sleep(Duration::from_millis(600)).await;
    let messages = controller.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].owner_id, UserId::from("U2"));

    controller.mount(identity("U1")).await;
    assert_eq!(controller.messages().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn events_follow_the_pipeline() {
    let (controller, _) = mounted().await;
    let mut events = controller.subscribe();

    controller.set_compose("ui please").await;
    let id = controller
        .send()
        .await
        .sent()
        .unwrap()
        .reply
        .wait()
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let thinking_on = index_of(&seen, |e| {
        matches!(e, ConversationEvent::ThinkingChanged { thinking: true })
    });
    let reply_added = index_of(&seen, |e| {
        matches!(e, ConversationEvent::MessageAdded { id: added } if *added == id)
    });
    let completed = index_of(&seen, |e| {
        matches!(e, ConversationEvent::StreamingCompleted { id: done } if *done == id)
    });
    assert!(thinking_on < reply_added);
    assert!(reply_added < completed);
}

#[tokio::test(start_paused = true)]
async fn follows_session_sign_in_and_out() {
    let store = Arc::new(InMemoryStore::new());
    let auth = Arc::new(InMemoryAuth::new());
    let session = SessionManager::new(auth.clone(), store.clone());
    let controller = ConversationController::new(store.clone(), ChatSettings::default());

    session.init().await;
    let follower = controller.follow_session(&session);

    session.sign_up("ada@example.com", "hunter2").await.unwrap();
    for _ in 0..100 {
        if controller.phase().await == ConversationPhase::Ready {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, ConversationPhase::Ready);
    assert_eq!(snapshot.identity, session.current_identity());

    session.sign_out().await.unwrap();
    for _ in 0..100 {
        if controller.phase().await == ConversationPhase::Uninitialized {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(controller.phase().await, ConversationPhase::Uninitialized);

    controller.shutdown().await;
    follower.await.unwrap();
    session.teardown();
}

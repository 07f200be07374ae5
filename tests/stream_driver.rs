use std::sync::Arc;
use std::time::Duration;

use agent_protocol::{
    ContentChunk, Harness, HarnessCapabilities, HarnessError, NewSessionRequest,
    NewSessionResponse, NotificationListener, NotificationSource, PromptRequest, PromptResponse,
    SessionNotification, SessionUpdate, SubscriptionId,
};
use agent_protocol_mock::MockHarness;
use pretty_assertions::assert_eq;
use session_store::{
    ContentBlock, MemoryStore, Role, SessionId, SessionMode, Store, ToolCallStatus,
};
use session_stream::{
    BufferMode, CreateSessionParams, DemuxOptions, SessionLifecycle,
    StreamDemultiplexer, StreamDriver,
};

fn spawn_driver(store: &Arc<MemoryStore>, mode: BufferMode) -> StreamDriver {
    StreamDriver::spawn(StreamDemultiplexer::new(
        Arc::clone(store) as Arc<dyn Store>,
        DemuxOptions::default()
            .with_buffer_mode(mode)
            .with_flush_delay(Duration::from_millis(50)),
    ))
}

fn agent_text(session: &str, text: &str) -> SessionNotification {
    SessionNotification::new(
        session,
        SessionUpdate::AgentMessageChunk(ContentChunk::text(text)),
    )
}

fn session(id: &str) -> SessionId {
    SessionId::parse(id).expect("session id should be valid")
}

#[tokio::test(start_paused = true)]
async fn buffered_blocks_land_when_the_timer_fires() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Buffered);

    driver
        .submit(agent_text("sess-1", "Hello"))
        .expect("driver should accept notifications");
    driver
        .submit(agent_text("sess-1", " again"))
        .expect("driver should accept notifications");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.message_count(), 0, "write waits for the flush delay");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = store.messages_for_session(&session("sess-1"));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].plain_text(), "Hello again");
    assert_eq!(store.write_count(), 1, "both chunks share one write");

    driver.shutdown().await.expect("driver should stop cleanly");
}

#[tokio::test(start_paused = true)]
async fn shutdown_performs_a_final_flush() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Buffered);

    driver
        .submit(agent_text("sess-1", "pending"))
        .expect("driver should accept notifications");
    let demux = driver.shutdown().await.expect("driver should stop cleanly");

    assert!(!demux.has_pending());
    assert_eq!(store.message_count(), 1);
}

#[tokio::test]
async fn finalize_session_waits_for_queued_notifications() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Buffered);

    driver
        .submit(agent_text("sess-1", "tail"))
        .expect("driver should accept notifications");
    let closed = driver
        .finalize_session(session("sess-1"))
        .await
        .expect("finalize should be answered");

    assert_eq!(closed, 1);
    let messages = store.messages_for_session(&session("sess-1"));
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].is_streaming);

    driver.shutdown().await.expect("driver should stop cleanly");
}

#[tokio::test]
async fn detach_is_idempotent_and_stops_delivery() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Unbuffered);
    let harness = Arc::new(MockHarness::default());

    let attachment = driver.attach(Arc::clone(&harness) as Arc<dyn NotificationSource>);
    assert_eq!(harness.subscriber_count(), 1);

    harness.emit(agent_text("sess-1", "seen"));
    driver.flush().await.expect("flush should be answered");
    assert_eq!(store.message_count(), 1);

    assert!(attachment.detach());
    assert!(!attachment.detach());
    assert!(attachment.is_detached());
    assert_eq!(harness.subscriber_count(), 0);

    harness.emit(agent_text("sess-2", "unseen"));
    driver.flush().await.expect("flush should be answered");
    assert!(store.get_session(&session("sess-2")).is_none());

    driver.shutdown().await.expect("driver should stop cleanly");
}

#[tokio::test]
async fn several_sources_feed_one_driver() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Buffered);
    let first = Arc::new(MockHarness::default());
    let second = Arc::new(MockHarness::default());

    let first_attachment = driver.attach(Arc::clone(&first) as Arc<dyn NotificationSource>);
    let second_attachment = driver.attach(Arc::clone(&second) as Arc<dyn NotificationSource>);
    first.emit(agent_text("sess-1", "from first"));
    second.emit(agent_text("sess-2", "from second"));
    driver.flush().await.expect("flush should be answered");

    assert_eq!(store.message_count(), 2);
    first_attachment.detach();
    second_attachment.detach();
    driver.shutdown().await.expect("driver should stop cleanly");
}

#[tokio::test]
async fn mock_prompt_materializes_a_full_turn() {
    let store = Arc::new(MemoryStore::new());
    let driver = spawn_driver(&store, BufferMode::Buffered);
    let harness = Arc::new(MockHarness::new(vec!["Hello world".to_string()]));
    let attachment = driver.attach(Arc::clone(&harness) as Arc<dyn NotificationSource>);

    let created = SessionLifecycle::new(Arc::clone(&store) as Arc<dyn Store>)
        .with_env_mode(None)
        .create_session(harness.as_ref(), CreateSessionParams::new("/work"))
        .expect("session should be created");
    harness
        .prompt(PromptRequest::text(created.id.as_str(), "Say hello"))
        .expect("prompt should succeed");
    let still_open = driver
        .finalize_session(created.id.clone())
        .await
        .expect("finalize should be answered");
    attachment.detach();

    assert_eq!(still_open, 0, "every mock stream ends with a final chunk");
    let messages = store.messages_for_session(&created.id);
    assert_eq!(
        messages
            .iter()
            .map(|message| message.role)
            .collect::<Vec<_>>(),
        vec![Role::User, Role::Assistant, Role::Assistant]
    );
    assert_eq!(messages[0].plain_text(), "Say hello");
    assert_eq!(
        messages[1].content,
        vec![ContentBlock::thinking("Planning the response.")]
    );
    assert_eq!(messages[2].plain_text(), "Hello world");
    assert!(messages.iter().all(|message| !message.is_streaming));
    assert!(matches!(
        messages[2].latest_tool_calls().as_slice(),
        [ContentBlock::ToolCall {
            status: ToolCallStatus::Succeeded,
            ..
        }]
    ));

    let stored = store.get_session(&created.id).expect("session should exist");
    assert_eq!(stored.title.as_deref(), Some("Say hello"));
    assert_eq!(stored.message_ids.len(), 3);

    driver.shutdown().await.expect("driver should stop cleanly");
}

/// Streams a complete agent message before acknowledging session creation.
struct EarlyStreamingHarness(MockHarness);

impl Harness for EarlyStreamingHarness {
    fn harness_id(&self) -> &str {
        self.0.harness_id()
    }

    fn capabilities(&self) -> HarnessCapabilities {
        HarnessCapabilities::default()
    }

    fn create_session(&self, req: NewSessionRequest) -> Result<NewSessionResponse, HarnessError> {
        let response = self.0.create_session(req)?;
        self.0.emit(SessionNotification::new(
            response.session_id.as_str(),
            SessionUpdate::AgentMessageChunk(ContentChunk::text("early").finished()),
        ));
        Ok(response)
    }

    fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, HarnessError> {
        self.0.prompt(req)
    }
}

impl NotificationSource for EarlyStreamingHarness {
    fn subscribe(&self, listener: NotificationListener) -> SubscriptionId {
        self.0.subscribe(listener)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.0.unsubscribe(subscription)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_streamed_before_session_creation_stay_linked() {
    for _ in 0..200 {
        let store = Arc::new(MemoryStore::new());
        let driver = spawn_driver(&store, BufferMode::Unbuffered);
        let harness = Arc::new(EarlyStreamingHarness(MockHarness::default()));
        let attachment = driver.attach(Arc::clone(&harness) as Arc<dyn NotificationSource>);

        let created = SessionLifecycle::new(Arc::clone(&store) as Arc<dyn Store>)
            .with_env_mode(Some("read-only".to_string()))
            .create_session(harness.as_ref(), CreateSessionParams::new("/work"))
            .expect("session should be created");
        driver
            .flush()
            .await
            .expect("flush should be answered");
        attachment.detach();
        driver.shutdown().await.expect("driver should stop cleanly");

        let messages = store.messages_for_session(&created.id);
        assert_eq!(messages.len(), 1, "early message must stay in its session");
        assert_eq!(messages[0].plain_text(), "early");
        let stored = store.get_session(&created.id).expect("session should exist");
        assert_eq!(stored.mode, SessionMode::ReadOnly);
    }
}

#[tokio::test]
async fn dropping_the_driver_still_flushes_with_sources_attached() {
    let store = Arc::new(MemoryStore::new());
    let driver = StreamDriver::spawn(StreamDemultiplexer::new(
        Arc::clone(&store) as Arc<dyn Store>,
        DemuxOptions::default().with_flush_delay(Duration::from_secs(3600)),
    ));
    let harness = Arc::new(MockHarness::default());
    let attachment = driver.attach(Arc::clone(&harness) as Arc<dyn NotificationSource>);

    harness.emit(agent_text("sess-1", "unflushed"));
    drop(driver);

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.message_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("dropped driver should flush before stopping");

    assert_eq!(
        store.messages_for_session(&session("sess-1"))[0].plain_text(),
        "unflushed"
    );
    assert!(attachment.detach());
}

use std::sync::Arc;

use agent_protocol::{
    ContentChunk, HarnessErrorKind, SessionUpdate, StopReason, ToolCallFields,
};
use agent_protocol_mock::MockHarness;
use coding_agent::harnesses::{harness_for_id, SelectedHarness};
use coding_agent::transcript;
use coding_agent::turn::{run_turn, TurnError};
use pretty_assertions::assert_eq;
use session_store::{MemoryStore, Role, Store};
use session_stream::{BufferMode, CreateSessionParams, DemuxOptions, SessionLifecycle};

fn lifecycle(store: &Arc<MemoryStore>) -> SessionLifecycle {
    SessionLifecycle::new(Arc::clone(store) as Arc<dyn Store>).with_env_mode(None)
}

#[tokio::test]
async fn default_mock_turn_renders_a_complete_transcript() {
    let selected = harness_for_id("mock").expect("mock harness should resolve");
    let store = Arc::new(MemoryStore::new());

    let outcome = run_turn(
        &selected,
        Arc::clone(&store),
        &lifecycle(&store),
        DemuxOptions::default(),
        CreateSessionParams::new("/work"),
        "Summarize the repo".to_string(),
    )
    .await
    .expect("turn should succeed");

    assert_eq!(outcome.stop_reason, StopReason::EndTurn);
    assert_eq!(outcome.messages.len(), 3);
    assert!(outcome.messages.iter().all(|message| !message.is_streaming));

    let rendered = transcript::render(&outcome.messages);
    assert!(rendered.starts_with("user>\n  Summarize the repo\n"));
    assert!(rendered.contains("(thinking) Planning the response."));
    assert!(rendered.contains("[tool read (mock-call-1): succeeded]"));
    assert!(rendered.contains("## Mocked coding agent run"));
    assert!(!rendered.contains("(incomplete)"));
}

#[tokio::test]
async fn streams_left_open_by_the_harness_are_closed_after_the_prompt() {
    let selected = SelectedHarness::new(Arc::new(MockHarness::scripted(vec![
        SessionUpdate::AgentMessageChunk(ContentChunk::text("no final flag")),
        SessionUpdate::ToolCall(ToolCallFields {
            tool_call_id: Some("call-7".to_string()),
            status: Some("in_progress".to_string()),
            ..ToolCallFields::default()
        }),
    ])));
    let store = Arc::new(MemoryStore::new());

    let outcome = run_turn(
        &selected,
        Arc::clone(&store),
        &lifecycle(&store),
        DemuxOptions::default().with_buffer_mode(BufferMode::Unbuffered),
        CreateSessionParams::new("/work"),
        "go".to_string(),
    )
    .await
    .expect("turn should succeed");

    assert_eq!(outcome.messages.len(), 1);
    assert_eq!(outcome.messages[0].role, Role::Assistant);
    assert!(!outcome.messages[0].is_streaming);
    assert_eq!(outcome.messages[0].plain_text(), "no final flag");
}

#[tokio::test]
async fn harness_errors_surface_as_turn_errors() {
    let selected = harness_for_id("mock").expect("mock harness should resolve");
    let store = Arc::new(MemoryStore::new());

    let error = run_turn(
        &selected,
        Arc::clone(&store),
        &lifecycle(&store),
        DemuxOptions::default(),
        CreateSessionParams::new(""),
        "go".to_string(),
    )
    .await
    .expect_err("blank cwd should fail session creation");

    match error {
        TurnError::Lifecycle(session_stream::LifecycleError::Harness(inner)) => {
            assert_eq!(inner.kind(), HarnessErrorKind::Rpc);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.sessions().is_empty());
}

//! Deterministic mock implementation of the shared `agent_protocol` contract.
//!
//! This crate contains no transport logic and is intended for local
//! development and contract-level integration testing. Prompts are answered
//! synchronously: every notification is delivered to subscribers before
//! `prompt` returns.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use agent_protocol::{
    ContentChunk, ContentPayload, Harness, HarnessCapabilities, HarnessError, ListenerSet,
    McpServerSpec, NewSessionRequest, NewSessionResponse, NotificationListener, NotificationSource,
    PromptRequest, PromptResponse, SessionInfoFields, SessionNotification, SessionUpdate,
    StopReason, SubscriptionId, ToolCallFields,
};
use serde_json::json;

/// Stable harness identifier used for explicit startup selection.
pub const MOCK_HARNESS_ID: &str = "mock";

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockSession {
    id: String,
    cwd: String,
    mcp_servers: Vec<McpServerSpec>,
    mode: Option<String>,
    model: Option<String>,
    prompts: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: Vec<MockSession>,
    next_session: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Script {
    /// Streams the configured chunks word by word around one tool call.
    Chunks(Vec<String>),
    /// Replays exactly these updates for every prompt.
    Updates(Vec<SessionUpdate>),
}

/// Deterministic mock harness used by tests and local runs.
#[derive(Debug)]
pub struct MockHarness {
    script: Script,
    capabilities: HarnessCapabilities,
    token_delay: Duration,
    listeners: ListenerSet,
    state: Mutex<MockState>,
}

impl MockHarness {
    /// Creates a mock harness that streams caller-provided chunks.
    #[must_use]
    pub fn new(chunks: Vec<String>) -> Self {
        Self::with_script(Script::Chunks(chunks))
    }

    /// Creates a mock harness that replays `updates` verbatim on every prompt.
    #[must_use]
    pub fn scripted(updates: Vec<SessionUpdate>) -> Self {
        Self::with_script(Script::Updates(updates))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            capabilities: HarnessCapabilities {
                set_mode: true,
                set_model: true,
            },
            token_delay: Duration::ZERO,
            listeners: ListenerSet::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Overrides the declared optional RPCs.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: HarnessCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleeps between streamed tokens to mimic a live backend.
    #[must_use]
    pub fn with_token_delay(mut self, token_delay: Duration) -> Self {
        self.token_delay = token_delay;
        self
    }

    /// Returns the mode most recently pushed for a session.
    pub fn session_mode(&self, session_id: &str) -> Option<String> {
        self.find_session(session_id)
            .and_then(|session| session.mode)
    }

    /// Returns the model most recently pushed for a session.
    pub fn session_model(&self, session_id: &str) -> Option<String> {
        self.find_session(session_id)
            .and_then(|session| session.model)
    }

    pub fn session_cwd(&self, session_id: &str) -> Option<String> {
        self.find_session(session_id).map(|session| session.cwd)
    }

    pub fn session_mcp_servers(&self, session_id: &str) -> Vec<McpServerSpec> {
        self.find_session(session_id)
            .map(|session| session.mcp_servers)
            .unwrap_or_default()
    }

    pub fn prompts(&self, session_id: &str) -> Vec<String> {
        self.find_session(session_id)
            .map(|session| session.prompts)
            .unwrap_or_default()
    }

    /// Emits an arbitrary notification to every subscriber.
    pub fn emit(&self, notification: SessionNotification) {
        self.listeners.emit(notification);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn find_session(&self, session_id: &str) -> Option<MockSession> {
        lock_unpoisoned(&self.state)
            .sessions
            .iter()
            .find(|session| session.id == session_id)
            .cloned()
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut MockSession) -> T,
    ) -> Result<T, HarnessError> {
        let mut state = lock_unpoisoned(&self.state);
        let session = state
            .sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .ok_or_else(|| HarnessError::rpc(format!("unknown session '{session_id}'")))?;
        Ok(apply(session))
    }

    fn stream_chunks(&self, session_id: &str, prompt: &str, chunks: &[String]) {
        let emit = |update: SessionUpdate| {
            self.listeners
                .emit(SessionNotification::new(session_id, update));
        };

        emit(SessionUpdate::UserMessageChunk(
            ContentChunk::text(prompt).finished(),
        ));
        emit(SessionUpdate::SessionInfoUpdate(SessionInfoFields {
            title: Some(title_for_prompt(prompt)),
            updated_at: None,
            meta: None,
        }));
        emit(SessionUpdate::AgentThoughtChunk(
            ContentChunk::text("Planning the response.").finished(),
        ));
        emit(SessionUpdate::ToolCall(ToolCallFields {
            tool_call_id: Some("mock-call-1".to_string()),
            title: Some("read".to_string()),
            kind: Some("read".to_string()),
            status: Some("pending".to_string()),
            raw_input: Some(json!({ "path": "README.md" })),
            ..ToolCallFields::default()
        }));
        emit(SessionUpdate::ToolCallUpdate(ToolCallFields {
            tool_call_id: Some("mock-call-1".to_string()),
            status: Some("completed".to_string()),
            raw_output: Some(json!({ "bytes": 128 })),
            ..ToolCallFields::default()
        }));

        let mut tokens: Vec<String> = Vec::new();
        for chunk in chunks {
            let mut pending_token = String::new();
            for ch in chunk.chars() {
                pending_token.push(ch);
                if matches!(ch, ' ' | '\n') {
                    tokens.push(std::mem::take(&mut pending_token));
                }
            }

            if !pending_token.is_empty() {
                tokens.push(pending_token);
            }
        }

        let last_index = tokens.len().saturating_sub(1);
        for (index, token) in tokens.into_iter().enumerate() {
            let chunk = ContentChunk::text(token);
            let chunk = if index == last_index {
                chunk.finished()
            } else {
                chunk
            };
            emit(SessionUpdate::AgentMessageChunk(chunk));

            if !self.token_delay.is_zero() {
                thread::sleep(self.token_delay);
            }
        }
    }
}

impl Default for MockHarness {
    fn default() -> Self {
        Self::new(vec![
            "## Mocked coding agent run\n".to_string(),
            "- Reading context and **validating constraints**.\n".to_string(),
            "- Reviewing files and command expectations.\n".to_string(),
            "### Streaming plan\n".to_string(),
            "- Prepare minimal edits.\n".to_string(),
            "- Keep output deterministic.\n".to_string(),
            "Completed.\n".to_string(),
        ])
    }
}

impl Harness for MockHarness {
    fn harness_id(&self) -> &str {
        MOCK_HARNESS_ID
    }

    fn capabilities(&self) -> HarnessCapabilities {
        self.capabilities
    }

    fn create_session(&self, req: NewSessionRequest) -> Result<NewSessionResponse, HarnessError> {
        if req.cwd.trim().is_empty() {
            return Err(HarnessError::rpc("cwd is required"));
        }

        let mut state = lock_unpoisoned(&self.state);
        state.next_session += 1;
        let id = format!("mock-session-{}", state.next_session);
        state.sessions.push(MockSession {
            id: id.clone(),
            cwd: req.cwd,
            mcp_servers: req.mcp_servers,
            mode: None,
            model: None,
            prompts: Vec::new(),
        });

        Ok(NewSessionResponse { session_id: id })
    }

    fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, HarnessError> {
        let prompt_text: String = req
            .prompt
            .iter()
            .filter_map(|content| match content {
                ContentPayload::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.with_session(&req.session_id, |session| {
            session.prompts.push(prompt_text.clone());
        })?;

        match &self.script {
            Script::Chunks(chunks) => self.stream_chunks(&req.session_id, &prompt_text, chunks),
            Script::Updates(updates) => {
                for update in updates {
                    self.listeners.emit(SessionNotification::new(
                        req.session_id.as_str(),
                        update.clone(),
                    ));
                }
            }
        }

        Ok(PromptResponse {
            stop_reason: StopReason::EndTurn,
        })
    }

    fn set_session_mode(&self, session_id: &str, mode_id: &str) -> Result<(), HarnessError> {
        if !self.capabilities.set_mode {
            return Err(HarnessError::unsupported("set_session_mode"));
        }

        self.with_session(session_id, |session| {
            session.mode = Some(mode_id.to_string());
        })
    }

    fn set_session_model(&self, session_id: &str, model_id: &str) -> Result<(), HarnessError> {
        if !self.capabilities.set_model {
            return Err(HarnessError::unsupported("set_session_model"));
        }

        self.with_session(session_id, |session| {
            session.model = Some(model_id.to_string());
        })
    }
}

impl NotificationSource for MockHarness {
    fn subscribe(&self, listener: NotificationListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.listeners.unsubscribe(subscription)
    }
}

fn title_for_prompt(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "Untitled session".to_string();
    }

    first_line.chars().take(48).collect()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use agent_protocol::HarnessErrorKind;

    use super::*;

    fn new_session(harness: &MockHarness) -> String {
        harness
            .create_session(NewSessionRequest {
                cwd: "/work".to_string(),
                mcp_servers: Vec::new(),
            })
            .expect("mock session should be created")
            .session_id
    }

    fn collect_updates(harness: &MockHarness, prompt: &str) -> Vec<SessionNotification> {
        let session_id = new_session(harness);
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let subscription = harness.subscribe(Box::new(move |notification| {
            lock_unpoisoned(&sink).push(notification);
        }));

        harness
            .prompt(PromptRequest::text(session_id, prompt))
            .expect("mock prompt should succeed");
        harness.unsubscribe(subscription);

        let collected = lock_unpoisoned(&collected).clone();
        collected
    }

    #[test]
    fn create_session_allocates_sequential_ids() {
        let harness = MockHarness::new(Vec::new());

        assert_eq!(new_session(&harness), "mock-session-1");
        assert_eq!(new_session(&harness), "mock-session-2");
        assert_eq!(harness.session_cwd("mock-session-1").as_deref(), Some("/work"));
    }

    #[test]
    fn prompt_streams_tokens_and_finishes_last_chunk() {
        let harness = MockHarness::new(vec!["one two".to_string()]);

        let notifications = collect_updates(&harness, "hello");
        let agent_chunks: Vec<&ContentChunk> = notifications
            .iter()
            .filter_map(|notification| match &notification.update {
                SessionUpdate::AgentMessageChunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect();

        assert_eq!(agent_chunks.len(), 2);
        assert!(agent_chunks[0].meta.is_none());
        assert!(agent_protocol::final_flag(agent_chunks[1].meta.as_ref()));
        assert!(matches!(
            notifications.first().map(|notification| &notification.update),
            Some(SessionUpdate::UserMessageChunk(_))
        ));
        assert!(notifications
            .iter()
            .any(|notification| matches!(notification.update, SessionUpdate::ToolCallUpdate(_))));
    }

    #[test]
    fn scripted_harness_replays_updates_verbatim() {
        let updates = vec![
            SessionUpdate::AgentMessageChunk(ContentChunk::text("a")),
            SessionUpdate::Unknown,
        ];
        let harness = MockHarness::scripted(updates.clone());

        let notifications = collect_updates(&harness, "ignored");

        assert_eq!(
            notifications
                .into_iter()
                .map(|notification| notification.update)
                .collect::<Vec<_>>(),
            updates
        );
    }

    #[test]
    fn prompt_for_unknown_session_is_an_rpc_error() {
        let harness = MockHarness::default();

        let error = harness
            .prompt(PromptRequest::text("missing", "hi"))
            .expect_err("unknown session should fail");

        assert_eq!(error.kind(), HarnessErrorKind::Rpc);
        assert!(error.message().contains("unknown session 'missing'"));
    }

    #[test]
    fn optional_rpcs_follow_declared_capabilities() {
        let harness = MockHarness::default();
        let session_id = new_session(&harness);

        harness
            .set_session_mode(&session_id, "read-only")
            .expect("mode switching is declared");
        harness
            .set_session_model(&session_id, "mock-large")
            .expect("model switching is declared");
        assert_eq!(harness.session_mode(&session_id).as_deref(), Some("read-only"));
        assert_eq!(harness.session_model(&session_id).as_deref(), Some("mock-large"));

        let limited = MockHarness::default().with_capabilities(HarnessCapabilities::default());
        let error = limited
            .set_session_mode("any", "auto")
            .expect_err("undeclared capability should fail");
        assert_eq!(error.kind(), HarnessErrorKind::Unsupported);
    }

    #[test]
    fn blank_prompt_titles_fall_back() {
        assert_eq!(title_for_prompt("  \nsecond"), "Untitled session");
        assert_eq!(title_for_prompt("Fix flaky test\nmore"), "Fix flaky test");
    }
}

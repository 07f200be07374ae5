//! Minimal harness-agnostic contract for driving agent sessions.
//!
//! This crate defines the session protocol payloads a harness emits and the
//! RPC surface a client calls. It excludes transport details (process
//! spawning, stdio framing, HTTP hooks) and any client-side state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

mod notification;

pub use notification::{
    final_flag, BlobResource, ContentChunk, ContentPayload, EmbeddedResource, SessionInfoFields,
    SessionNotification, SessionUpdate, TextResource, ToolCallContent, ToolCallFields,
    FINAL_META_KEYS,
};

/// Identifier of one notification subscription.
pub type SubscriptionId = u64;

/// Callback invoked for every notification a harness emits.
pub type NotificationListener = Box<dyn Fn(SessionNotification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessErrorKind {
    /// The harness does not implement the requested RPC.
    Unsupported,
    /// The harness answered the RPC with an error.
    Rpc,
    /// The harness could not be reached.
    Transport,
}

/// Error returned by harness RPCs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessError {
    kind: HarnessErrorKind,
    message: String,
}

impl HarnessError {
    #[must_use]
    pub fn new(kind: HarnessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            HarnessErrorKind::Unsupported,
            format!("{operation} is not supported by this harness"),
        )
    }

    #[must_use]
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::new(HarnessErrorKind::Rpc, message)
    }

    #[must_use]
    pub fn kind(&self) -> HarnessErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HarnessError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}

/// MCP server launch definition passed to a harness on session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub session_id: String,
    pub prompt: Vec<ContentPayload>,
}

impl PromptRequest {
    #[must_use]
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: vec![ContentPayload::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    MaxTurnRequests,
    Refusal,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub stop_reason: StopReason,
}

/// Optional RPCs a harness declares up front instead of being probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarnessCapabilities {
    pub set_mode: bool,
    pub set_model: bool,
}

/// Harness interface for creating and prompting sessions.
pub trait Harness: Send + Sync + 'static {
    /// Stable identifier used for explicit harness selection.
    fn harness_id(&self) -> &str;

    /// Returns the optional RPCs this harness implements.
    fn capabilities(&self) -> HarnessCapabilities {
        HarnessCapabilities::default()
    }

    fn create_session(&self, req: NewSessionRequest) -> Result<NewSessionResponse, HarnessError>;

    /// Sends a prompt. Streaming output is delivered through the harness'
    /// [`NotificationSource`], not through the return value.
    fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, HarnessError>;

    /// Switches the permission mode of a session.
    ///
    /// Only called when [`HarnessCapabilities::set_mode`] is declared.
    fn set_session_mode(&self, session_id: &str, mode_id: &str) -> Result<(), HarnessError> {
        let _ = (session_id, mode_id);
        Err(HarnessError::unsupported("set_session_mode"))
    }

    /// Switches the model of a session.
    ///
    /// Only called when [`HarnessCapabilities::set_model`] is declared.
    fn set_session_model(&self, session_id: &str, model_id: &str) -> Result<(), HarnessError> {
        let _ = (session_id, model_id);
        Err(HarnessError::unsupported("set_session_model"))
    }
}

/// Event source for session notifications.
pub trait NotificationSource: Send + Sync {
    fn subscribe(&self, listener: NotificationListener) -> SubscriptionId;

    /// Removes a listener. Returns false when the id was not subscribed.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool;
}

/// Listener bookkeeping shared by harness implementations.
///
/// Listeners are invoked outside the internal lock, so a listener may
/// subscribe or unsubscribe re-entrantly.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Arc<NotificationListener>)>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, notification: SessionNotification) {
        let listeners: Vec<Arc<NotificationListener>> = lock_unpoisoned(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(notification.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.listeners).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

impl NotificationSource for ListenerSet {
    fn subscribe(&self, listener: NotificationListener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock_unpoisoned(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut listeners = lock_unpoisoned(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        listeners.len() != before
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

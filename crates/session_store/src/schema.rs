use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::ids::{MessageId, SessionId, ToolCallId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Domain lifecycle of one tool invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ResourceMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mime_type.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.size.is_none()
    }
}

/// Embedded resource body: inline text or base64 blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum ResourcePayload {
    Text { text: String },
    Blob { blob: String },
}

/// One typed unit of message content.
///
/// The set of variants is closed; every consumer matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    Code {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    ToolCall {
        tool_call_id: ToolCallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Map<String, Value>>,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    ResourceLink {
        uri: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<ResourceMetadata>,
    },
    Resource {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        payload: ResourcePayload,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    /// Returns the serialized `type` tag of this block.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::Code { .. } => "code",
            Self::ToolCall { .. } => "tool_call",
            Self::ResourceLink { .. } => "resource_link",
            Self::Resource { .. } => "resource",
        }
    }

    pub fn tool_call_id(&self) -> Option<&ToolCallId> {
        match self {
            Self::ToolCall { tool_call_id, .. } => Some(tool_call_id),
            Self::Text { .. }
            | Self::Thinking { .. }
            | Self::Code { .. }
            | Self::ResourceLink { .. }
            | Self::Resource { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_streaming: bool,
}

impl Message {
    /// Concatenates every text block, ignoring other content.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the most recent block for every tool call, in first-seen order.
    ///
    /// Tool-call updates are appended rather than merged, so several blocks can
    /// share one id.
    pub fn latest_tool_calls(&self) -> Vec<&ContentBlock> {
        let mut order: Vec<&ToolCallId> = Vec::new();
        let mut latest: Vec<&ContentBlock> = Vec::new();

        for block in &self.content {
            let Some(id) = block.tool_call_id() else {
                continue;
            };

            match order.iter().position(|seen| *seen == id) {
                Some(index) => latest[index] = block,
                None => {
                    order.push(id);
                    latest.push(block);
                }
            }
        }

        latest
    }
}

/// Append-only update applied to a stored message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub append: Vec<ContentBlock>,
    pub is_streaming: Option<bool>,
}

impl MessagePatch {
    #[must_use]
    pub fn append(blocks: Vec<ContentBlock>) -> Self {
        Self {
            append: blocks,
            is_streaming: None,
        }
    }

    #[must_use]
    pub fn finalize(mut self) -> Self {
        self.is_streaming = Some(false);
        self
    }

    /// Applies the patch. A finished message never returns to streaming.
    pub fn apply_to(self, message: &mut Message) {
        message.content.extend(self.append);
        if self.is_streaming == Some(false) {
            message.is_streaming = false;
        }
    }
}

/// Permission mode of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionMode {
    #[serde(rename = "read-only")]
    ReadOnly,
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "full-access")]
    FullAccess,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Auto => "auto",
            Self::FullAccess => "full-access",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "read-only" => Ok(Self::ReadOnly),
            "auto" => Ok(Self::Auto),
            "full-access" => Ok(Self::FullAccess),
            other => Err(format!(
                "unknown session mode '{other}'; expected read-only, auto or full-access"
            )),
        }
    }
}

/// MCP server definition after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
}

impl Session {
    /// Creates an empty session in the default mode.
    #[must_use]
    pub fn new(id: SessionId, now: OffsetDateTime) -> Self {
        Self {
            id,
            title: None,
            agent_id: None,
            message_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            mode: SessionMode::default(),
            metadata: None,
        }
    }
}

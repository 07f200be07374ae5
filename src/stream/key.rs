use session_store::{Role, SessionId, ToolCallId};

/// Which logical stream of a session a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    UserMessage,
    AgentMessage,
    AgentThought,
    /// One assistant message per tool call (`ToolCallRouting::PerToolCall`).
    ToolCall,
}

impl StreamKind {
    #[must_use]
    pub fn role(self) -> Role {
        match self {
            Self::UserMessage => Role::User,
            Self::AgentMessage | Self::AgentThought | Self::ToolCall => Role::Assistant,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AgentMessage => "agent_message",
            Self::AgentThought => "agent_thought",
            Self::ToolCall => "tool_call",
        }
    }
}

/// Names one in-flight message: at most one open message exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub session_id: SessionId,
    pub kind: StreamKind,
    pub tool_call_id: Option<ToolCallId>,
}

impl StreamKey {
    #[must_use]
    pub fn new(session_id: SessionId, kind: StreamKind) -> Self {
        Self {
            session_id,
            kind,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn for_tool_call(session_id: SessionId, tool_call_id: ToolCallId) -> Self {
        Self {
            session_id,
            kind: StreamKind::ToolCall,
            tool_call_id: Some(tool_call_id),
        }
    }
}

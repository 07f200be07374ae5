//! Message and session records plus the narrow store contract the stream
//! engine writes through.
//!
//! Content is append-only: [`MessagePatch`] can add blocks and end streaming,
//! never rewrite what is already stored.

mod error;
mod ids;
mod schema;
mod store;

pub use error::{IdError, StoreError};
pub use ids::{MessageId, SessionId, ToolCallId, UNKNOWN_TOOL_CALL_ID};
pub use schema::{
    ContentBlock, McpServer, Message, MessagePatch, ResourceMetadata, ResourcePayload, Role,
    Session, SessionMetadata, SessionMode, ToolCallStatus,
};
pub use store::{MemoryStore, Store};

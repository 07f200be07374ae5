//! Backend payload to [`ContentDelta`] translation.
//!
//! Everything here is lenient: malformed values are coerced or dropped, and
//! only the builder decides whether a delta is rejected.

use agent_protocol::{ContentPayload, EmbeddedResource, ToolCallContent, ToolCallFields};
use serde_json::Value;
use session_store::{ResourceMetadata, ResourcePayload, ToolCallStatus};

use crate::builder::ContentDelta;

/// Maps a backend tool-call status onto the domain lifecycle.
#[must_use]
pub fn map_tool_status(status: Option<&str>) -> ToolCallStatus {
    match status {
        Some("in_progress") => ToolCallStatus::Running,
        Some("completed") => ToolCallStatus::Succeeded,
        Some("failed") => ToolCallStatus::Failed,
        Some("pending") | None => ToolCallStatus::Pending,
        Some(other) => {
            tracing::debug!(status = other, "unrecognized tool call status; using pending");
            ToolCallStatus::Pending
        }
    }
}

/// Maps chunk content. `thought` selects thinking over text for text payloads.
#[must_use]
pub fn chunk_delta(content: ContentPayload, thought: bool) -> ContentDelta {
    match content {
        ContentPayload::Text { text } if thought => ContentDelta::Thinking { text },
        ContentPayload::Text { text } => ContentDelta::Text { text },
        ContentPayload::Image {
            data,
            mime_type,
            uri,
        } => ContentDelta::Resource {
            uri,
            mime_type: Some(mime_type),
            payload: ResourcePayload::Blob { blob: data },
        },
        ContentPayload::Audio { data, mime_type } => ContentDelta::Resource {
            uri: None,
            mime_type: Some(mime_type),
            payload: ResourcePayload::Blob { blob: data },
        },
        ContentPayload::ResourceLink {
            uri,
            name,
            mime_type,
            title,
            description,
            size,
        } => {
            let metadata = ResourceMetadata {
                mime_type,
                title,
                description,
                size: size.as_ref().and_then(coerce_size),
            };
            ContentDelta::ResourceLink {
                uri,
                name,
                metadata: (!metadata.is_empty()).then_some(metadata),
            }
        }
        ContentPayload::Resource { resource } => match resource {
            EmbeddedResource::Text(resource) => ContentDelta::Resource {
                uri: Some(resource.uri),
                mime_type: resource.mime_type,
                payload: ResourcePayload::Text {
                    text: resource.text,
                },
            },
            EmbeddedResource::Blob(resource) => ContentDelta::Resource {
                uri: Some(resource.uri),
                mime_type: resource.mime_type,
                payload: ResourcePayload::Blob {
                    blob: resource.blob,
                },
            },
        },
        ContentPayload::Unsupported { content_type } => {
            ContentDelta::Unsupported { content_type }
        }
    }
}

/// Maps a `tool_call` / `tool_call_update` payload.
#[must_use]
pub fn tool_call_delta(fields: ToolCallFields) -> ContentDelta {
    let status = map_tool_status(fields.status.as_deref());
    let result = fields.raw_output.or_else(|| tool_content_text(&fields.content));

    ContentDelta::ToolCall {
        tool_call_id: fields.tool_call_id,
        name: fields.title.or(fields.kind),
        arguments: fields.raw_input.filter(Value::is_object),
        status: Some(status),
        result,
    }
}

/// Coerces a resource size to `u64`; negative, fractional or non-numeric
/// values yield `None`.
#[must_use]
pub fn coerce_size(value: &Value) -> Option<u64> {
    let Value::Number(number) = value else {
        return None;
    };

    if let Some(size) = number.as_u64() {
        return Some(size);
    }

    let size = number.as_f64()?;
    if size.is_finite() && size >= 0.0 && size.fract() == 0.0 && size <= u64::MAX as f64 {
        Some(size as u64)
    } else {
        None
    }
}

fn tool_content_text(content: &[ToolCallContent]) -> Option<Value> {
    let text: Vec<&str> = content
        .iter()
        .filter_map(|item| match item {
            ToolCallContent::Content {
                content: ContentPayload::Text { text },
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(Value::String(text.join("\n")))
    }
}

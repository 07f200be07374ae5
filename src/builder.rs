//! Validation of protocol-agnostic content deltas into stored content blocks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use session_store::{ContentBlock, ResourceMetadata, ResourcePayload, ToolCallId, ToolCallStatus};
use thiserror::Error;

/// One unit of content extracted from a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub body: ContentDelta,
    /// Set when the notification closed its stream.
    pub is_final: bool,
}

impl Delta {
    #[must_use]
    pub fn new(body: ContentDelta) -> Self {
        Self {
            body,
            is_final: false,
        }
    }

    #[must_use]
    pub fn finished(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Content as the engine sees it before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    Code {
        text: String,
        language: Option<String>,
    },
    ToolCall {
        tool_call_id: Option<String>,
        name: Option<String>,
        arguments: Option<Value>,
        status: Option<ToolCallStatus>,
        result: Option<Value>,
    },
    ResourceLink {
        uri: String,
        name: String,
        metadata: Option<ResourceMetadata>,
    },
    Resource {
        uri: Option<String>,
        mime_type: Option<String>,
        payload: ResourcePayload,
    },
    /// Backend content type with no domain counterpart.
    Unsupported {
        content_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("tool call '{tool_call_id}' arguments must be a JSON object")]
    InvalidArguments { tool_call_id: String },

    #[error("{kind} block requires a non-blank {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("blob resource requires a mime type")]
    MissingMimeType,

    #[error("blob resource is not valid base64")]
    InvalidBase64(#[source] base64::DecodeError),

    #[error("unsupported content type '{content_type}'")]
    UnsupportedContent { content_type: String },
}

/// Output of [`BlockBuilder::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderSignal {
    BlockReady(ContentBlock),
    /// The delta closed its stream.
    StreamDone,
    Error(BuildError),
}

/// Converts deltas into content blocks.
pub trait BlockBuilder: Send {
    fn handle(&self, delta: Delta, emit: &mut dyn FnMut(BuilderSignal));
}

/// Default stateless [`BlockBuilder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentBlockBuilder;

impl ContentBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates one delta body.
    pub fn build(&self, body: ContentDelta) -> Result<ContentBlock, BuildError> {
        match body {
            ContentDelta::Text { text } => Ok(ContentBlock::Text { text }),
            ContentDelta::Thinking { text } => Ok(ContentBlock::Thinking { text }),
            ContentDelta::Code { text, language } => Ok(ContentBlock::Code {
                text,
                language: language
                    .map(|language| language.trim().to_string())
                    .filter(|language| !language.is_empty()),
            }),
            ContentDelta::ToolCall {
                tool_call_id,
                name,
                arguments,
                status,
                result,
            } => {
                let tool_call_id = tool_call_id
                    .and_then(|id| ToolCallId::parse(id).ok())
                    .unwrap_or_else(ToolCallId::unknown);
                let arguments = match arguments {
                    None => None,
                    Some(Value::Object(map)) => Some(map),
                    Some(_) => {
                        return Err(BuildError::InvalidArguments {
                            tool_call_id: tool_call_id.into_inner(),
                        })
                    }
                };

                Ok(ContentBlock::ToolCall {
                    tool_call_id,
                    name,
                    arguments,
                    status: status.unwrap_or_default(),
                    result,
                })
            }
            ContentDelta::ResourceLink {
                uri,
                name,
                metadata,
            } => {
                require_non_blank("resource_link", "uri", &uri)?;
                require_non_blank("resource_link", "name", &name)?;
                Ok(ContentBlock::ResourceLink {
                    uri,
                    name,
                    metadata: metadata.filter(|metadata| !metadata.is_empty()),
                })
            }
            ContentDelta::Resource {
                uri,
                mime_type,
                payload,
            } => {
                if let ResourcePayload::Blob { blob } = &payload {
                    if mime_type.as_deref().map_or(true, |mime| mime.trim().is_empty()) {
                        return Err(BuildError::MissingMimeType);
                    }
                    STANDARD.decode(blob).map_err(BuildError::InvalidBase64)?;
                }

                Ok(ContentBlock::Resource {
                    uri,
                    mime_type,
                    payload,
                })
            }
            ContentDelta::Unsupported { content_type } => {
                Err(BuildError::UnsupportedContent { content_type })
            }
        }
    }
}

impl BlockBuilder for ContentBlockBuilder {
    fn handle(&self, delta: Delta, emit: &mut dyn FnMut(BuilderSignal)) {
        match self.build(delta.body) {
            Ok(block) => {
                emit(BuilderSignal::BlockReady(block));
                if delta.is_final {
                    emit(BuilderSignal::StreamDone);
                }
            }
            Err(error) => emit(BuilderSignal::Error(error)),
        }
    }
}

fn require_non_blank(
    kind: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), BuildError> {
    if value.trim().is_empty() {
        return Err(BuildError::MissingField { kind, field });
    }

    Ok(())
}

//! Session notification payloads as emitted by harnesses.
//!
//! Field names follow the wire format (camelCase, `sessionUpdate` tag). Values
//! stay loosely typed where backends are known to disagree (tool status,
//! resource size); normalization happens in the consumer.

use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Metadata keys recognized as "this chunk ends its stream".
pub const FINAL_META_KEYS: [&str; 2] = ["isFinal", "is_final"];

/// Returns true when a metadata map carries a boolean `true` under one of
/// [`FINAL_META_KEYS`]. Non-boolean values are ignored.
#[must_use]
pub fn final_flag(meta: Option<&Map<String, Value>>) -> bool {
    let Some(meta) = meta else {
        return false;
    };

    FINAL_META_KEYS
        .iter()
        .any(|key| meta.get(*key).and_then(Value::as_bool) == Some(true))
}

/// Decodes an optional field, treating a value of the wrong shape as absent
/// so one bad field never rejects the whole notification.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// One protocol message about a session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    pub session_id: String,
    pub update: SessionUpdate,
}

impl SessionNotification {
    #[must_use]
    pub fn new(session_id: impl Into<String>, update: SessionUpdate) -> Self {
        Self {
            session_id: session_id.into(),
            update,
        }
    }

    /// Decodes one JSON-encoded notification.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    SessionInfoUpdate(SessionInfoFields),
    AgentMessageChunk(ContentChunk),
    UserMessageChunk(ContentChunk),
    AgentThoughtChunk(ContentChunk),
    ToolCall(ToolCallFields),
    ToolCallUpdate(ToolCallFields),
    /// Any kind this client does not consume (plans, command lists, ...).
    #[serde(other)]
    Unknown,
}

impl SessionUpdate {
    /// Wire name of the update kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInfoUpdate(_) => "session_info_update",
            Self::AgentMessageChunk(_) => "agent_message_chunk",
            Self::UserMessageChunk(_) => "user_message_chunk",
            Self::AgentThoughtChunk(_) => "agent_thought_chunk",
            Self::ToolCall(_) => "tool_call",
            Self::ToolCallUpdate(_) => "tool_call_update",
            Self::Unknown => "unknown",
        }
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::SessionInfoUpdate(fields) => fields.meta.as_ref(),
            Self::AgentMessageChunk(chunk)
            | Self::UserMessageChunk(chunk)
            | Self::AgentThoughtChunk(chunk) => chunk.meta.as_ref(),
            Self::ToolCall(fields) | Self::ToolCallUpdate(fields) => fields.meta.as_ref(),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        final_flag(self.meta())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoFields {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ISO-8601 timestamp as sent by the backend; may be malformed. Non-string
    /// values decode as `None`.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(
        rename = "_meta",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub content: ContentPayload,
    #[serde(
        rename = "_meta",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub meta: Option<Map<String, Value>>,
}

impl ContentChunk {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ContentPayload::Text { text: text.into() },
            meta: None,
        }
    }

    /// Marks the chunk as the last one of its stream.
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(FINAL_META_KEYS[0].to_string(), Value::Bool(true));
        self
    }
}

/// Content types with a dedicated [`ContentPayload`] variant.
const KNOWN_CONTENT_TYPES: [&str; 5] = ["text", "image", "audio", "resource_link", "resource"];

/// Backend-side content representation.
///
/// The derived impls are generated as inherent functions (`remote = "Self"`)
/// and wrapped below so unknown content types keep their wire name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", tag = "type", rename_all = "snake_case")]
pub enum ContentPayload {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename_all = "camelCase")]
    ResourceLink {
        uri: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// 64-bit size; kept raw because backends send ints, floats or strings.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Value>,
    },
    Resource {
        resource: EmbeddedResource,
    },
    /// Content type this client does not understand.
    #[serde(skip)]
    Unsupported { content_type: String },
}

impl Serialize for ContentPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unsupported { content_type } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", content_type)?;
                map.end()
            }
            known => ContentPayload::serialize(known, serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Some(content_type) = value.get("type").and_then(Value::as_str) {
            if !KNOWN_CONTENT_TYPES.contains(&content_type) {
                return Ok(Self::Unsupported {
                    content_type: content_type.to_string(),
                });
            }
        }

        ContentPayload::deserialize(value).map_err(de::Error::custom)
    }
}

impl ContentPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::ResourceLink { .. } => "resource_link",
            Self::Resource { .. } => "resource",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddedResource {
    Text(TextResource),
    Blob(BlobResource),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub blob: String,
}

/// Fields shared by `tool_call` and `tool_call_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFields {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `pending`, `in_progress`, `completed`, `failed`, or anything else.
    /// Non-string values decode as `None`.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolCallContent>,
    #[serde(
        rename = "_meta",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    Content {
        content: ContentPayload,
    },
    #[serde(rename_all = "camelCase")]
    Diff {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        new_text: String,
    },
    #[serde(rename_all = "camelCase")]
    Terminal {
        terminal_id: String,
    },
    #[serde(other)]
    Other,
}

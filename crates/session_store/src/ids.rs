//! Validated identifier newtypes.
//!
//! Each identifier wraps a non-empty `String`. The types are distinct so a
//! session id can never be passed where a message id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Placeholder used when a backend omits the tool-call id on a tool-call update.
pub const UNKNOWN_TOOL_CALL_ID: &str = "unknown-tool-call";

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps an identifier; blank input is rejected.
            pub fn parse(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError::Empty { kind: $kind });
                }

                Ok(Self(value))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::parse(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_id! {
    /// Identifier of one agent session.
    SessionId, "session id"
}

validated_id! {
    /// Identifier of one materialized message.
    MessageId, "message id"
}

validated_id! {
    /// Identifier of one tool invocation reported by a backend.
    ToolCallId, "tool call id"
}

impl MessageId {
    /// Generates a random (UUID v4) message id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ToolCallId {
    /// Returns the sentinel id used when a backend omits the tool-call id.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_TOOL_CALL_ID.to_string())
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_TOOL_CALL_ID
    }
}

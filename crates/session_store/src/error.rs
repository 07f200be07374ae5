use thiserror::Error;

use crate::ids::{MessageId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("{kind} must be a non-empty string")]
    Empty { kind: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("message '{0}' already exists")]
    DuplicateMessage(MessageId),

    #[error("message '{0}' does not exist")]
    UnknownMessage(MessageId),

    #[error("session '{0}' does not exist")]
    UnknownSession(SessionId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

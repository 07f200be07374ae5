use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::ids::{MessageId, SessionId};
use crate::schema::{Message, MessagePatch, Session};

/// Narrow persistence contract used by the stream engine.
///
/// Implementations are shared between the writer task and readers, so every
/// method takes `&self`.
pub trait Store: Send + Sync {
    /// Stores a new message and links it to its session.
    fn append_message(&self, message: Message) -> Result<(), StoreError>;

    /// Applies an append-only patch to an existing message.
    fn update_message(&self, message_id: &MessageId, patch: MessagePatch)
        -> Result<(), StoreError>;

    /// Inserts or replaces a session record.
    fn upsert_session(&self, session: Session) -> Result<(), StoreError>;

    /// Reads, edits and stores one session record with no other write to it
    /// in between. `edit` receives the stored record (`None` when the session
    /// is unknown) and returns the record to keep, with the same id. It must
    /// not call back into the store.
    fn update_session(
        &self,
        session_id: &SessionId,
        edit: &mut dyn FnMut(Option<Session>) -> Session,
    ) -> Result<Session, StoreError>;

    fn get_session(&self, session_id: &SessionId) -> Option<Session>;

    fn get_message(&self, message_id: &MessageId) -> Option<Message>;
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<SessionId, Session>,
    messages: Vec<Message>,
    index_by_id: HashMap<MessageId, usize>,
    writes: usize,
}

/// Process-local [`Store`] used by tests and the headless client.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages of a session in the order they were appended.
    pub fn messages_for_session(&self, session_id: &SessionId) -> Vec<Message> {
        let state = lock_unpoisoned(&self.state);
        let Some(session) = state.sessions.get(session_id) else {
            return Vec::new();
        };

        session
            .message_ids
            .iter()
            .filter_map(|id| state.index_by_id.get(id))
            .map(|index| state.messages[*index].clone())
            .collect()
    }

    pub fn sessions(&self) -> Vec<Session> {
        let state = lock_unpoisoned(&self.state);
        let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
        sessions.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        sessions
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        lock_unpoisoned(&self.state).messages.len()
    }

    /// Number of successful message writes (appends plus updates).
    #[must_use]
    pub fn write_count(&self) -> usize {
        lock_unpoisoned(&self.state).writes
    }
}

impl Store for MemoryStore {
    fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let mut state = lock_unpoisoned(&self.state);
        let state = &mut *state;

        if state.index_by_id.contains_key(&message.id) {
            return Err(StoreError::DuplicateMessage(message.id));
        }

        let Some(session) = state.sessions.get_mut(&message.session_id) else {
            return Err(StoreError::UnknownSession(message.session_id));
        };
        session.message_ids.push(message.id.clone());

        state
            .index_by_id
            .insert(message.id.clone(), state.messages.len());
        state.messages.push(message);
        state.writes += 1;
        Ok(())
    }

    fn update_message(
        &self,
        message_id: &MessageId,
        patch: MessagePatch,
    ) -> Result<(), StoreError> {
        let mut state = lock_unpoisoned(&self.state);
        let Some(index) = state.index_by_id.get(message_id).copied() else {
            return Err(StoreError::UnknownMessage(message_id.clone()));
        };

        patch.apply_to(&mut state.messages[index]);
        state.writes += 1;
        Ok(())
    }

    fn upsert_session(&self, session: Session) -> Result<(), StoreError> {
        let mut state = lock_unpoisoned(&self.state);
        state.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn update_session(
        &self,
        session_id: &SessionId,
        edit: &mut dyn FnMut(Option<Session>) -> Session,
    ) -> Result<Session, StoreError> {
        let mut state = lock_unpoisoned(&self.state);
        let session = edit(state.sessions.get(session_id).cloned());
        state.sessions.insert(session_id.clone(), session.clone());
        Ok(session)
    }

    fn get_session(&self, session_id: &SessionId) -> Option<Session> {
        lock_unpoisoned(&self.state).sessions.get(session_id).cloned()
    }

    fn get_message(&self, message_id: &MessageId) -> Option<Message> {
        let state = lock_unpoisoned(&self.state);
        state
            .index_by_id
            .get(message_id)
            .map(|index| state.messages[*index].clone())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

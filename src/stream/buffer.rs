use std::collections::HashMap;

use session_store::{ContentBlock, MessageId, Role, SessionId};
use time::OffsetDateTime;

/// Pending writes for one message between two flushes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BufferEntry {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
    pub finalize: bool,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

/// Identity of the message a block is written to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteTarget {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub started_at: OffsetDateTime,
}

/// Entries drain in the order their messages were first touched.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    entries: Vec<BufferEntry>,
    index_by_id: HashMap<MessageId, usize>,
}

impl WriteBuffer {
    pub fn push_block(&mut self, target: &WriteTarget, block: ContentBlock) {
        self.entry(target).blocks.push(block);
    }

    pub fn mark_final(&mut self, target: &WriteTarget, finished_at: OffsetDateTime) {
        let entry = self.entry(target);
        entry.finalize = true;
        entry.finished_at = Some(finished_at);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<BufferEntry> {
        self.index_by_id.clear();
        std::mem::take(&mut self.entries)
    }

    fn entry(&mut self, target: &WriteTarget) -> &mut BufferEntry {
        let index = match self.index_by_id.get(&target.message_id) {
            Some(index) => *index,
            None => {
                let index = self.entries.len();
                self.entries.push(BufferEntry {
                    message_id: target.message_id.clone(),
                    session_id: target.session_id.clone(),
                    role: target.role,
                    blocks: Vec::new(),
                    finalize: false,
                    started_at: target.started_at,
                    finished_at: None,
                });
                self.index_by_id.insert(target.message_id.clone(), index);
                index
            }
        };

        &mut self.entries[index]
    }
}

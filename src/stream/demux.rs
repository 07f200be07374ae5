use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_protocol::{SessionInfoFields, SessionNotification, SessionUpdate, ToolCallFields};
use session_store::{
    Message, MessageId, MessagePatch, Session, SessionId, Store, ToolCallId,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::builder::{BlockBuilder, BuilderSignal, ContentBlockBuilder, ContentDelta, Delta};
use crate::config::{EnvConfig, DEFAULT_FLUSH_DELAY};
use crate::hooks::{self, CompletionHook, StreamCompleted};
use crate::stream::buffer::{BufferEntry, WriteBuffer, WriteTarget};
use crate::stream::key::{StreamKey, StreamKind};
use crate::stream::mapping::{chunk_delta, map_tool_status, tool_call_delta};

/// Source of wall-clock timestamps for messages and instrumentation.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

pub trait MessageIdFactory: Send + Sync {
    fn next_id(&self) -> MessageId;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidMessageIds;

impl MessageIdFactory for UuidMessageIds {
    fn next_id(&self) -> MessageId {
        MessageId::generate()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferMode {
    /// Blocks are queued and written by the coalescing flush timer.
    #[default]
    Buffered,
    /// Every notification is written before `handle_notification` returns.
    Unbuffered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolCallRouting {
    /// Tool-call blocks join the current assistant message.
    #[default]
    Inline,
    /// Each tool call gets its own assistant message, finalized once the
    /// call reaches a terminal status.
    PerToolCall,
}

/// Construction-time collaborators and switches.
pub struct DemuxOptions {
    pub clock: Arc<dyn Clock>,
    pub message_ids: Arc<dyn MessageIdFactory>,
    pub builder: Box<dyn BlockBuilder>,
    pub buffer_mode: BufferMode,
    pub flush_delay: Duration,
    pub tool_call_routing: ToolCallRouting,
    pub hooks: Vec<Arc<dyn CompletionHook>>,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            message_ids: Arc::new(UuidMessageIds),
            builder: Box::new(ContentBlockBuilder::new()),
            buffer_mode: BufferMode::default(),
            flush_delay: DEFAULT_FLUSH_DELAY,
            tool_call_routing: ToolCallRouting::default(),
            hooks: Vec::new(),
        }
    }
}

impl DemuxOptions {
    /// Applies the environment switches on top of the defaults.
    #[must_use]
    pub fn from_config(config: &EnvConfig) -> Self {
        Self {
            buffer_mode: config.buffer_mode(),
            flush_delay: config.flush_delay,
            tool_call_routing: config.tool_call_routing,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_message_ids(mut self, message_ids: Arc<dyn MessageIdFactory>) -> Self {
        self.message_ids = message_ids;
        self
    }

    #[must_use]
    pub fn with_builder(mut self, builder: Box<dyn BlockBuilder>) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub fn with_buffer_mode(mut self, buffer_mode: BufferMode) -> Self {
        self.buffer_mode = buffer_mode;
        self
    }

    #[must_use]
    pub fn with_flush_delay(mut self, flush_delay: Duration) -> Self {
        self.flush_delay = flush_delay;
        self
    }

    #[must_use]
    pub fn with_tool_call_routing(mut self, routing: ToolCallRouting) -> Self {
        self.tool_call_routing = routing;
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl fmt::Debug for DemuxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemuxOptions")
            .field("buffer_mode", &self.buffer_mode)
            .field("flush_delay", &self.flush_delay)
            .field("tool_call_routing", &self.tool_call_routing)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct OpenStream {
    message_id: MessageId,
    started_at: OffsetDateTime,
    /// Position in open order, used to finalize deterministically.
    sequence: u64,
}

/// Turns session notifications into ordered, append-only store messages.
///
/// Not thread-safe by itself; the async host confines it to one task (see
/// [`StreamDriver`](crate::StreamDriver)). Notification handling never fails:
/// bad input is coerced or dropped and store failures are logged.
pub struct StreamDemultiplexer {
    store: Arc<dyn Store>,
    options: DemuxOptions,
    open: HashMap<StreamKey, OpenStream>,
    next_sequence: u64,
    buffer: WriteBuffer,
    flush_timer: Option<Instant>,
}

impl StreamDemultiplexer {
    pub fn new(store: Arc<dyn Store>, options: DemuxOptions) -> Self {
        Self {
            store,
            options,
            open: HashMap::new(),
            next_sequence: 0,
            buffer: WriteBuffer::default(),
            flush_timer: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn handle_notification(&mut self, notification: SessionNotification) {
        let SessionNotification { session_id, update } = notification;
        let session_id = match SessionId::parse(session_id) {
            Ok(session_id) => session_id,
            Err(error) => {
                tracing::debug!(kind = update.kind(), %error, "ignoring notification");
                return;
            }
        };
        let is_final = update.is_final();

        match update {
            SessionUpdate::SessionInfoUpdate(fields) => self.apply_session_info(session_id, fields),
            SessionUpdate::AgentMessageChunk(chunk) => self.handle_delta(
                StreamKey::new(session_id, StreamKind::AgentMessage),
                chunk_delta(chunk.content, false),
                is_final,
            ),
            SessionUpdate::UserMessageChunk(chunk) => self.handle_delta(
                StreamKey::new(session_id, StreamKind::UserMessage),
                chunk_delta(chunk.content, false),
                is_final,
            ),
            SessionUpdate::AgentThoughtChunk(chunk) => self.handle_delta(
                StreamKey::new(session_id, StreamKind::AgentThought),
                chunk_delta(chunk.content, true),
                is_final,
            ),
            SessionUpdate::ToolCall(fields) | SessionUpdate::ToolCallUpdate(fields) => {
                self.handle_tool_call(session_id, fields, is_final)
            }
            SessionUpdate::Unknown => {
                tracing::trace!(session_id = %session_id, "ignoring unhandled session update");
            }
        }
    }

    /// Force-finalizes every open stream of a session, oldest first, and
    /// writes all pending blocks. Returns the number of streams that were
    /// open.
    pub fn finalize_session(&mut self, session_id: &SessionId) -> usize {
        let mut streams: Vec<(u64, StreamKey)> = self
            .open
            .iter()
            .filter(|(key, _)| &key.session_id == session_id)
            .map(|(key, stream)| (stream.sequence, key.clone()))
            .collect();
        streams.sort_unstable_by_key(|(sequence, _)| *sequence);
        let keys: Vec<StreamKey> = streams.into_iter().map(|(_, key)| key).collect();

        for key in &keys {
            self.finalize_stream(key);
        }
        self.flush();

        tracing::debug!(session_id = %session_id, streams = keys.len(), "session finalized");
        keys.len()
    }

    /// Retires one stream key. Returns false when the key was not open.
    pub fn finalize_stream(&mut self, key: &StreamKey) -> bool {
        let Some(stream) = self.open.remove(key) else {
            return false;
        };

        let finished_at = self.options.clock.now();
        let target = WriteTarget {
            message_id: stream.message_id,
            session_id: key.session_id.clone(),
            role: key.kind.role(),
            started_at: stream.started_at,
        };
        self.buffer.mark_final(&target, finished_at);
        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            stream = key.kind.as_str(),
            duration_ms = (finished_at - target.started_at).whole_milliseconds() as i64,
            "stream finalized"
        );
        self.schedule_flush();
        true
    }

    /// Writes every buffered entry and disarms the flush timer.
    pub fn flush(&mut self) {
        self.flush_timer = None;
        for entry in self.buffer.drain() {
            self.apply_entry(entry);
        }
    }

    /// Flushes when the timer deadline has passed.
    pub fn flush_if_due(&mut self, now: Instant) -> bool {
        match self.flush_timer {
            Some(deadline) if deadline <= now => {
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Deadline of the armed flush timer, if any.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_timer
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn open_stream_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_streams_for(&self, session_id: &SessionId) -> usize {
        self.open
            .keys()
            .filter(|key| &key.session_id == session_id)
            .count()
    }

    fn handle_tool_call(&mut self, session_id: SessionId, fields: ToolCallFields, is_final: bool) {
        let status = map_tool_status(fields.status.as_deref());
        let (key, finishes) = match self.options.tool_call_routing {
            ToolCallRouting::Inline => (
                StreamKey::new(session_id, StreamKind::AgentMessage),
                is_final,
            ),
            ToolCallRouting::PerToolCall => {
                let tool_call_id = fields
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| ToolCallId::parse(id).ok())
                    .unwrap_or_else(ToolCallId::unknown);
                (
                    StreamKey::for_tool_call(session_id, tool_call_id),
                    is_final || status.is_terminal(),
                )
            }
        };

        self.handle_delta(key, tool_call_delta(fields), finishes);
    }

    fn handle_delta(&mut self, key: StreamKey, body: ContentDelta, is_final: bool) {
        let target = self.resolve(&key);
        let mut signals = Vec::new();
        self.options
            .builder
            .handle(Delta { body, is_final }, &mut |signal| signals.push(signal));

        for signal in signals {
            match signal {
                BuilderSignal::BlockReady(block) => {
                    self.buffer.push_block(&target, block);
                    self.schedule_flush();
                }
                BuilderSignal::StreamDone => {
                    self.finalize_stream(&key);
                }
                BuilderSignal::Error(error) => tracing::warn!(
                    session_id = %target.session_id,
                    message_id = %target.message_id,
                    %error,
                    "dropping invalid content"
                ),
            }
        }

        if is_final {
            self.finalize_stream(&key);
        }
    }

    fn resolve(&mut self, key: &StreamKey) -> WriteTarget {
        let clock = &self.options.clock;
        let message_ids = &self.options.message_ids;
        let next_sequence = &mut self.next_sequence;
        let stream = self.open.entry(key.clone()).or_insert_with(|| {
            let stream = OpenStream {
                message_id: message_ids.next_id(),
                started_at: clock.now(),
                sequence: *next_sequence,
            };
            *next_sequence += 1;
            tracing::trace!(
                session_id = %key.session_id,
                message_id = %stream.message_id,
                stream = key.kind.as_str(),
                "stream opened"
            );
            stream
        });

        WriteTarget {
            message_id: stream.message_id.clone(),
            session_id: key.session_id.clone(),
            role: key.kind.role(),
            started_at: stream.started_at,
        }
    }

    fn schedule_flush(&mut self) {
        match self.options.buffer_mode {
            BufferMode::Unbuffered => self.flush(),
            BufferMode::Buffered => {
                if self.flush_timer.is_none() {
                    self.flush_timer = Some(Instant::now() + self.options.flush_delay);
                }
            }
        }
    }

    fn apply_session_info(&mut self, session_id: SessionId, fields: SessionInfoFields) {
        let now = self.options.clock.now();
        let updated_at = fields
            .updated_at
            .as_deref()
            .and_then(|raw| parse_timestamp(&session_id, raw))
            .unwrap_or(now);
        let title = fields.title;

        let result = self.store.update_session(&session_id, &mut |existing| {
            let mut session = existing.unwrap_or_else(|| Session::new(session_id.clone(), now));
            if let Some(title) = &title {
                session.title = Some(title.clone());
            }
            session.updated_at = updated_at;
            session
        });
        if let Err(error) = result {
            tracing::error!(session_id = %session_id, %error, "failed to store session info");
        }
    }

    fn apply_entry(&mut self, entry: BufferEntry) {
        let BufferEntry {
            message_id,
            session_id,
            role,
            blocks,
            finalize,
            started_at,
            finished_at,
        } = entry;

        let was_streaming = match self.store.get_message(&message_id) {
            Some(message) => {
                let was_streaming = message.is_streaming;
                let mut patch = MessagePatch::append(blocks);
                if finalize {
                    patch = patch.finalize();
                }
                if patch.append.is_empty() && !(finalize && was_streaming) {
                    return;
                }
                if let Err(error) = self.store.update_message(&message_id, patch) {
                    tracing::error!(
                        session_id = %session_id,
                        message_id = %message_id,
                        %error,
                        "failed to update message"
                    );
                    return;
                }
                was_streaming
            }
            None => {
                if blocks.is_empty() {
                    return;
                }
                if let Err(error) = self.ensure_session(&session_id) {
                    tracing::error!(session_id = %session_id, %error, "failed to create session");
                    return;
                }

                let message = Message {
                    id: message_id.clone(),
                    session_id: session_id.clone(),
                    role,
                    content: blocks,
                    created_at: started_at,
                    is_streaming: !finalize,
                };
                if let Err(error) = self.store.append_message(message) {
                    tracing::error!(
                        session_id = %session_id,
                        message_id = %message_id,
                        %error,
                        "failed to append message"
                    );
                    return;
                }
                true
            }
        };

        if finalize && was_streaming {
            let finished_at = finished_at.unwrap_or_else(|| self.options.clock.now());
            hooks::dispatch(
                &self.options.hooks,
                &StreamCompleted {
                    message_id,
                    session_id,
                    started_at,
                    finished_at,
                    duration: finished_at - started_at,
                },
            );
        }
    }

    fn ensure_session(&self, session_id: &SessionId) -> Result<(), session_store::StoreError> {
        let now = self.options.clock.now();
        let mut created = false;
        self.store.update_session(session_id, &mut |existing| {
            existing.unwrap_or_else(|| {
                created = true;
                Session::new(session_id.clone(), now)
            })
        })?;

        if created {
            tracing::debug!(session_id = %session_id, "created session on first message");
        }
        Ok(())
    }
}

fn parse_timestamp(session_id: &SessionId, raw: &str) -> Option<OffsetDateTime> {
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(updated_at) => Some(updated_at),
        Err(error) => {
            tracing::debug!(session_id = %session_id, value = raw, %error, "unparseable updatedAt");
            None
        }
    }
}

impl fmt::Debug for StreamDemultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDemultiplexer")
            .field("options", &self.options)
            .field("open_streams", &self.open.len())
            .field("flush_timer", &self.flush_timer)
            .finish_non_exhaustive()
    }
}

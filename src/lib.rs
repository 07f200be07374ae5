//! Translation of streaming agent-session notifications into an ordered,
//! append-only message history.
//!
//! # Public API Overview
//! - [`StreamDemultiplexer`] classifies notifications by stream, resolves one
//!   message per stream and writes validated blocks through a [`Store`].
//! - [`StreamDriver`] hosts a demultiplexer on a tokio task and owns the
//!   coalescing flush timer; [`StreamDriver::attach`] connects harnesses.
//! - [`ContentBlockBuilder`] validates content before it is stored.
//! - [`SessionLifecycle`] creates sessions on a harness and records them.
//!
//! Invariant: message content only grows, and a message stops streaming at
//! most once.
//!
//! [`Store`]: session_store::Store

pub mod builder;
pub mod config;
pub mod hooks;
pub mod lifecycle;
pub mod logging;
pub mod stream;

pub use crate::builder::{
    BlockBuilder, BuildError, BuilderSignal, ContentBlockBuilder, ContentDelta, Delta,
};
pub use crate::config::EnvConfig;
pub use crate::hooks::{CompletionHook, HookError, StreamCompleted};
pub use crate::lifecycle::{
    resolve_session_mode, substitute_variables, CreateSessionParams, LifecycleError, McpConfig,
    McpServerConfig, SessionLifecycle,
};
pub use crate::stream::{
    BufferMode, Clock, DemuxOptions, Detach, DriverError, MessageIdFactory, StreamDemultiplexer,
    StreamDriver, StreamKey, StreamKind, SystemClock, ToolCallRouting, UuidMessageIds,
};

//! Headless terminal client for driving one coding-agent turn.
//!
//! ## Harness bootstrap
//!
//! `coding_agent` selects its harness from `CODING_AGENT_HARNESS`:
//!
//! - `mock` (default) for the deterministic scripted harness
//!
//! ## Stream settings
//!
//! The stream engine reads `SESSION_STREAM_FLUSH_MS`,
//! `SESSION_STREAM_UNBUFFERED`, `SESSION_STREAM_TOOL_CALLS` and
//! `SESSION_STREAM_MODE`; log filtering uses `SESSION_STREAM_LOG` or
//! `RUST_LOG`. Logs go to stderr, the transcript to stdout.

pub mod harnesses;
pub mod transcript;
pub mod turn;

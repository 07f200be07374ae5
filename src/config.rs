//! Environment configuration.

use std::env;
use std::time::Duration;

use crate::stream::{BufferMode, ToolCallRouting};

pub const FLUSH_MS_ENV: &str = "SESSION_STREAM_FLUSH_MS";
pub const UNBUFFERED_ENV: &str = "SESSION_STREAM_UNBUFFERED";
pub const TOOL_CALLS_ENV: &str = "SESSION_STREAM_TOOL_CALLS";
pub const MODE_ENV: &str = "SESSION_STREAM_MODE";

/// Default coalescing window between the first buffered block and its write.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub flush_delay: Duration,
    pub unbuffered: bool,
    pub tool_call_routing: ToolCallRouting,
    /// Raw `SESSION_STREAM_MODE`; validated by the session lifecycle.
    pub session_mode: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
            unbuffered: false,
            tool_call_routing: ToolCallRouting::Inline,
            session_mode: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            flush_delay: env_millis(FLUSH_MS_ENV).unwrap_or(DEFAULT_FLUSH_DELAY),
            unbuffered: env_flag(UNBUFFERED_ENV),
            tool_call_routing: env_string_opt(TOOL_CALLS_ENV)
                .map(|value| tool_call_routing(&value))
                .unwrap_or_default(),
            session_mode: env_string_opt(MODE_ENV),
        }
    }

    #[must_use]
    pub fn buffer_mode(&self) -> BufferMode {
        if self.unbuffered {
            BufferMode::Unbuffered
        } else {
            BufferMode::Buffered
        }
    }
}

fn tool_call_routing(value: &str) -> ToolCallRouting {
    match value.trim().to_ascii_lowercase().as_str() {
        "per-call" | "per_call" => ToolCallRouting::PerToolCall,
        "inline" => ToolCallRouting::Inline,
        other => {
            tracing::warn!(value = other, "unrecognized {TOOL_CALLS_ENV}; using inline");
            ToolCallRouting::Inline
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = env_string_opt(key)?;
    match raw.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric millisecond value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn env_defaults_match_default_config() {
        let _lock = env_lock();
        let _g1 = set_env_guard(FLUSH_MS_ENV, None);
        let _g2 = set_env_guard(UNBUFFERED_ENV, None);
        let _g3 = set_env_guard(TOOL_CALLS_ENV, None);
        let _g4 = set_env_guard(MODE_ENV, None);

        let config = EnvConfig::from_env();
        assert_eq!(config, EnvConfig::default());
        assert_eq!(config.buffer_mode(), BufferMode::Buffered);
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(FLUSH_MS_ENV, Some(" 120 "));
        let _g2 = set_env_guard(UNBUFFERED_ENV, Some("1"));
        let _g3 = set_env_guard(TOOL_CALLS_ENV, Some("per-call"));
        let _g4 = set_env_guard(MODE_ENV, Some("read-only"));

        let config = EnvConfig::from_env();
        assert_eq!(config.flush_delay, Duration::from_millis(120));
        assert_eq!(config.buffer_mode(), BufferMode::Unbuffered);
        assert_eq!(config.tool_call_routing, ToolCallRouting::PerToolCall);
        assert_eq!(config.session_mode.as_deref(), Some("read-only"));
    }

    #[test]
    fn malformed_values_fall_back() {
        let _lock = env_lock();
        let _g1 = set_env_guard(FLUSH_MS_ENV, Some("soon"));
        let _g2 = set_env_guard(UNBUFFERED_ENV, Some("true"));
        let _g3 = set_env_guard(TOOL_CALLS_ENV, Some("sideways"));
        let _g4 = set_env_guard(MODE_ENV, Some("   "));

        let config = EnvConfig::from_env();
        assert_eq!(config.flush_delay, DEFAULT_FLUSH_DELAY);
        assert!(!config.unbuffered);
        assert_eq!(config.tool_call_routing, ToolCallRouting::Inline);
        assert!(config.session_mode.is_none());
    }
}

//! Process-wide `tracing` subscriber setup for binaries.
//!
//! Library code only emits events; nothing here runs unless a binary calls
//! [`init`].

use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "SESSION_STREAM_LOG";

const DEFAULT_FILTER: &str = "info";

/// Installs a stderr `fmt` subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init() {
    let directives = filter_directives(
        std::env::var(LOG_FILTER_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Picks the first non-blank directive string: ours, then `RUST_LOG`.
fn filter_directives(own: Option<String>, rust_log: Option<String>) -> String {
    [own, rust_log]
        .into_iter()
        .flatten()
        .map(|directives| directives.trim().to_string())
        .find(|directives| !directives.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_variable_wins_over_rust_log() {
        let directives = filter_directives(Some("debug".to_string()), Some("warn".to_string()));
        assert_eq!(directives, "debug");
    }

    #[test]
    fn blank_directives_fall_through() {
        let directives = filter_directives(Some("  ".to_string()), Some("trace".to_string()));
        assert_eq!(directives, "trace");
        assert_eq!(filter_directives(None, None), DEFAULT_FILTER);
    }
}

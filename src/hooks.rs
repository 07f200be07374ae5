//! Side channel notified when a streamed message is finalized.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use session_store::{MessageId, SessionId};
use time::{Duration, OffsetDateTime};

pub type HookError = Box<dyn Error + Send + Sync>;

/// Emitted once per message when it stops streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamCompleted {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub duration: Duration,
}

pub trait CompletionHook: Send + Sync {
    fn stream_completed(&self, event: &StreamCompleted) -> Result<(), HookError>;
}

impl<F> CompletionHook for F
where
    F: Fn(&StreamCompleted) -> Result<(), HookError> + Send + Sync,
{
    fn stream_completed(&self, event: &StreamCompleted) -> Result<(), HookError> {
        self(event)
    }
}

/// Calls every hook; failures and panics are logged and never propagate.
pub(crate) fn dispatch(hooks: &[Arc<dyn CompletionHook>], event: &StreamCompleted) {
    for hook in hooks {
        match catch_unwind(AssertUnwindSafe(|| hook.stream_completed(event))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(
                message_id = %event.message_id,
                session_id = %event.session_id,
                %error,
                "completion hook failed"
            ),
            Err(_) => tracing::error!(
                message_id = %event.message_id,
                session_id = %event.session_id,
                "completion hook panicked"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn event() -> StreamCompleted {
        StreamCompleted {
            message_id: MessageId::parse("msg-1").expect("valid id"),
            session_id: SessionId::parse("sess-1").expect("valid id"),
            started_at: OffsetDateTime::UNIX_EPOCH,
            finished_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(2),
            duration: Duration::seconds(2),
        }
    }

    #[test]
    fn failing_and_panicking_hooks_do_not_stop_later_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let hooks: Vec<Arc<dyn CompletionHook>> = vec![
            Arc::new(|_: &StreamCompleted| -> Result<(), HookError> { Err("nope".into()) }),
            Arc::new(|_: &StreamCompleted| -> Result<(), HookError> { panic!("hook bug") }),
            Arc::new(move |_: &StreamCompleted| -> Result<(), HookError> {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];

        dispatch(&hooks, &event());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

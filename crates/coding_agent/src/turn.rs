use std::sync::Arc;

use agent_protocol::{HarnessError, PromptRequest, StopReason};
use session_store::{MemoryStore, Message, Session, Store};
use session_stream::{
    CreateSessionParams, DemuxOptions, DriverError, LifecycleError, SessionLifecycle,
    StreamDemultiplexer, StreamDriver,
};
use thiserror::Error;

use crate::harnesses::SelectedHarness;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("prompt task failed: {0}")]
    Join(String),
}

/// Result of one headless prompt.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session: Session,
    pub stop_reason: StopReason,
    pub messages: Vec<Message>,
}

/// Creates a session, sends one prompt and waits until every stream of the
/// session is finalized in `store`.
pub async fn run_turn(
    selected: &SelectedHarness,
    store: Arc<MemoryStore>,
    lifecycle: &SessionLifecycle,
    options: DemuxOptions,
    params: CreateSessionParams,
    prompt: String,
) -> Result<TurnOutcome, TurnError> {
    let driver = StreamDriver::spawn(StreamDemultiplexer::new(
        Arc::clone(&store) as Arc<dyn Store>,
        options,
    ));
    let attachment = driver.attach(Arc::clone(&selected.notifications));

    let session = match lifecycle.create_session(selected.harness.as_ref(), params) {
        Ok(session) => session,
        Err(error) => {
            attachment.detach();
            driver.shutdown().await?;
            return Err(error.into());
        }
    };

    let harness = Arc::clone(&selected.harness);
    let request = PromptRequest::text(session.id.as_str(), prompt);
    let response = tokio::task::spawn_blocking(move || harness.prompt(request))
        .await
        .map_err(|error| TurnError::Join(error.to_string()))?;

    // Finalize even when the prompt failed so partial output is closed.
    let finalized = driver.finalize_session(session.id.clone()).await;
    attachment.detach();
    driver.shutdown().await?;

    let response = response?;
    let closed = finalized?;
    if closed > 0 {
        tracing::debug!(session_id = %session.id, streams = closed, "closed streams without final chunk");
    }

    Ok(TurnOutcome {
        messages: store.messages_for_session(&session.id),
        stop_reason: response.stop_reason,
        session,
    })
}

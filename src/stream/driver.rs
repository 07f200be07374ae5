//! Async host for [`StreamDemultiplexer`].
//!
//! The demultiplexer is owned by one tokio task. Every attached source,
//! finalize request and flush request is funneled through one unbounded
//! channel, so arrival order is preserved and no locking is needed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_protocol::{NotificationSource, SessionNotification, SubscriptionId};
use session_store::SessionId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::stream::demux::StreamDemultiplexer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("stream driver has stopped")]
    Stopped,
}

enum DriverCommand {
    Notification(SessionNotification),
    FinalizeSession {
        session_id: SessionId,
        reply: oneshot::Sender<usize>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the task that owns a [`StreamDemultiplexer`].
///
/// Dropping the handle without [`shutdown`](Self::shutdown) still stops the
/// task after a final flush, even while sources remain attached.
pub struct StreamDriver {
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: Option<JoinHandle<StreamDemultiplexer>>,
}

impl StreamDriver {
    /// Spawns the driver task on the current tokio runtime.
    pub fn spawn(demux: StreamDemultiplexer) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(demux, receiver));
        Self {
            commands,
            task: Some(task),
        }
    }

    /// Subscribes to `source`; notifications are forwarded to the driver
    /// until the returned handle is detached.
    #[must_use = "dropping the handle leaves the source attached"]
    pub fn attach(&self, source: Arc<dyn NotificationSource>) -> Detach {
        let commands = self.commands.clone();
        let subscription = source.subscribe(Box::new(move |notification| {
            if commands
                .send(DriverCommand::Notification(notification))
                .is_err()
            {
                tracing::trace!("stream driver stopped; dropping notification");
            }
        }));

        Detach {
            source,
            subscription,
            detached: AtomicBool::new(false),
        }
    }

    /// Queues one notification as if an attached source had emitted it.
    pub fn submit(&self, notification: SessionNotification) -> Result<(), DriverError> {
        self.commands
            .send(DriverCommand::Notification(notification))
            .map_err(|_| DriverError::Stopped)
    }

    /// Force-finalizes the open streams of a session once every notification
    /// queued before this call has been handled.
    pub async fn finalize_session(&self, session_id: SessionId) -> Result<usize, DriverError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(DriverCommand::FinalizeSession { session_id, reply })
            .map_err(|_| DriverError::Stopped)?;
        response.await.map_err(|_| DriverError::Stopped)
    }

    /// Writes everything queued so far without waiting for the timer.
    pub async fn flush(&self) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(DriverCommand::Flush(reply))
            .map_err(|_| DriverError::Stopped)?;
        response.await.map_err(|_| DriverError::Stopped)
    }

    /// Stops the task after a final flush and hands the demultiplexer back.
    pub async fn shutdown(mut self) -> Result<StreamDemultiplexer, DriverError> {
        let _ = self.commands.send(DriverCommand::Shutdown);
        let Some(task) = self.task.take() else {
            return Err(DriverError::Stopped);
        };
        task.await.map_err(|error| {
            tracing::error!(%error, "stream driver task failed");
            DriverError::Stopped
        })
    }
}

impl fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDriver")
            .field(
                "finished",
                &self.task.as_ref().map_or(true, JoinHandle::is_finished),
            )
            .finish_non_exhaustive()
    }
}

impl Drop for StreamDriver {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(DriverCommand::Shutdown);
        }
    }
}

/// Subscription created by [`StreamDriver::attach`].
pub struct Detach {
    source: Arc<dyn NotificationSource>,
    subscription: SubscriptionId,
    detached: AtomicBool,
}

impl Detach {
    /// Unsubscribes from the source. Only the first call has an effect.
    pub fn detach(&self) -> bool {
        if self.detached.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.source.unsubscribe(self.subscription)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Detach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detach")
            .field("subscription", &self.subscription)
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

async fn run(
    mut demux: StreamDemultiplexer,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
) -> StreamDemultiplexer {
    loop {
        let deadline = demux.flush_deadline();
        let command = tokio::select! {
            biased;
            () = sleep_until(deadline) => {
                demux.flush();
                continue;
            }
            command = commands.recv() => command,
        };

        match command {
            Some(DriverCommand::Notification(notification)) => {
                demux.handle_notification(notification);
            }
            Some(DriverCommand::FinalizeSession { session_id, reply }) => {
                let _ = reply.send(demux.finalize_session(&session_id));
            }
            Some(DriverCommand::Flush(reply)) => {
                demux.flush();
                let _ = reply.send(());
            }
            Some(DriverCommand::Shutdown) | None => break,
        }
    }

    demux.flush();
    demux
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

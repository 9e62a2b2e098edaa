//! Background refresh of the conversation list for unread counts.

use crate::backend::ChatBackend;
use crate::error::Result;
use squadlink_messaging::Conversation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Fetches the conversation list every `period` and hands each result to a callback.
///
/// The callback returns `false` to end polling. Dropping the poller stops it.
pub struct UnreadPoller {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl UnreadPoller {
    pub fn spawn<F>(backend: Arc<dyn ChatBackend>, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(Result<Vec<Conversation>>) -> bool + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the list was just loaded.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = timer.tick() => {
                        let result = backend.list_conversations().await;
                        match &result {
                            Ok(conversations) => debug!(count = conversations.len(), "unread poll"),
                            Err(err) => debug!(%err, "unread poll failed"),
                        }
                        if !on_tick(result) {
                            break;
                        }
                    }
                }
            }
            debug!("unread poller stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stop polling. A fetch already under way is abandoned.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some() && !self.task.is_finished()
    }
}

impl Drop for UnreadPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

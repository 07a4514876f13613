//! Notification queue and worker pool
//!
//! A bounded in-process queue of provider ids. Enqueue is synchronous and
//! non-blocking: when the queue is full the id is dropped and counted, and
//! the next poll cycle re-covers it by time range. Workers pop ids, fetch
//! the full message, and hand it to the pipeline.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mail::MailProvider;
use crate::metrics::{QUEUE_DEPTH, QUEUE_DROPPED_TOTAL};

use super::TriagePipeline;

/// Sender half of the notification queue, shared with the webhook handler.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<String>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (NotificationQueue { tx }, rx)
    }

    /// Non-blocking enqueue. Returns false (and counts the drop) when full.
    pub fn try_enqueue(&self, provider_id: String) -> bool {
        match self.tx.try_send(provider_id) {
            Ok(()) => {
                QUEUE_DEPTH.inc();
                true
            }
            Err(mpsc::error::TrySendError::Full(id)) => {
                QUEUE_DROPPED_TOTAL.inc();
                warn!(provider_id = %id, "notification queue full, dropping id");
                false
            }
            Err(mpsc::error::TrySendError::Closed(id)) => {
                warn!(provider_id = %id, "notification queue closed, dropping id");
                false
            }
        }
    }

    /// Current depth as reported by the gauge, for deep health.
    pub fn depth(&self) -> i64 {
        QUEUE_DEPTH.get()
    }
}

/// Spawn `count` workers draining the queue until shutdown.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::Receiver<String>,
    provider: Arc<dyn MailProvider>,
    pipeline: Arc<TriagePipeline>,
    mailbox: String,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let provider = Arc::clone(&provider);
            let pipeline = Arc::clone(&pipeline);
            let mailbox = mailbox.clone();
            let mut shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                debug!(worker_id, "notification worker started");
                loop {
                    let provider_id = tokio::select! {
                        _ = shutdown.recv() => break,
                        popped = async { rx.lock().await.recv().await } => match popped {
                            Some(id) => id,
                            None => break,
                        },
                    };
                    QUEUE_DEPTH.dec();

                    match provider.get_message(&mailbox, &provider_id).await {
                        Ok(message) => pipeline.process(message).await,
                        Err(err) => {
                            warn!(
                                worker_id,
                                provider_id = %provider_id,
                                error = %err,
                                "failed to fetch notified message"
                            );
                        }
                    }
                }
                info!(worker_id, "notification worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_drop_on_full() {
        let (queue, mut rx) = NotificationQueue::new(2);
        assert!(queue.try_enqueue("a".into()));
        assert!(queue.try_enqueue("b".into()));
        // Third attempt drops without blocking.
        assert!(!queue.try_enqueue("c".into()));

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }
}

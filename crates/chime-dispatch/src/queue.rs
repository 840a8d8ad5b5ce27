//! Delivery task queue plumbing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Default bound on how long an enqueue may block before giving up.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of one enqueued delivery: the occurrence's ledger key.
///
/// The task runner guarantees at-least-once invocation, not exclusivity;
/// the executor's claim check is what makes redelivery safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTask {
    pub user_id: String,
    pub bucket_key: String,
}

/// Sending half of the delivery queue.
///
/// Enqueueing applies bounded backpressure instead of dropping silently.
/// A task that cannot be enqueued leaves its occurrence queued in the
/// ledger, where the stale reaper eventually surfaces it as a terminal
/// failure.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryTask>,
}

impl DeliveryQueue {
    /// Create a bounded queue, returning the sender and the receiver the
    /// worker pool drains.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DeliveryTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a task. Returns false when the queue is full past the
    /// backpressure timeout or the workers are gone.
    pub async fn enqueue(&self, task: DeliveryTask) -> bool {
        match tokio::time::timeout(SEND_TIMEOUT, self.tx.send(task)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("delivery queue closed, task dropped");
                false
            }
            Err(_) => {
                warn!("delivery enqueue timed out, occurrence left for the stale reaper");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_delivers_to_receiver() {
        let (queue, mut rx) = DeliveryQueue::bounded(4);
        let task = DeliveryTask {
            user_id: "u1".to_string(),
            bucket_key: "hourly:2026-02-02T11".to_string(),
        };

        assert!(queue.enqueue(task.clone()).await);
        assert_eq!(rx.recv().await, Some(task));
    }

    #[tokio::test]
    async fn test_enqueue_reports_closed_queue() {
        let (queue, rx) = DeliveryQueue::bounded(4);
        drop(rx);

        let task = DeliveryTask {
            user_id: "u1".to_string(),
            bucket_key: "b".to_string(),
        };
        assert!(!queue.enqueue(task).await);
    }
}

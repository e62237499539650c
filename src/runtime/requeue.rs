//! Timer-driven requeues.
//!
//! Timeout and quota backoff timers fire outside of any watch event. They
//! re-enqueue their TaskRun through a channel that the controller consumes
//! with `reconcile_on`. Every watch loop iteration subscribes afresh, so
//! timers keep working across watch restarts.

use crate::controller::reconciler::TaskRunKey;
use crate::controller::timeout::TimerCallback;
use crate::crd::TaskRun;
use crate::observability;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use kube_runtime::reflector::ObjectRef;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TimerRequeue {
    sender: Mutex<Option<UnboundedSender<ObjectRef<TaskRun>>>>,
}

impl TimerRequeue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current subscriber with a new one
    pub fn subscribe(&self) -> UnboundedReceiver<ObjectRef<TaskRun>> {
        let (tx, rx) = mpsc::unbounded();
        match self.sender.lock() {
            Ok(mut sender) => *sender = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }
        rx
    }

    /// Re-enqueue the TaskRun identified by `key`
    pub fn requeue(&self, key: &str) {
        let key = match TaskRunKey::parse(key) {
            Ok(key) => key,
            Err(e) => {
                warn!("Timer fired for {}", e);
                return;
            }
        };
        let object_ref = ObjectRef::<TaskRun>::new(&key.name).within(&key.namespace);

        let Ok(sender) = self.sender.lock() else {
            warn!("Failed to requeue TaskRun {}: sender lock poisoned", key);
            return;
        };
        match sender.as_ref() {
            Some(tx) if tx.unbounded_send(object_ref).is_ok() => {
                debug!("⏰ Requeued TaskRun {} (trigger source: timer)", key);
                observability::metrics::increment_requeues_total("timer");
            }
            _ => warn!("Failed to requeue TaskRun {}: controller is not running", key),
        }
    }

    /// Callback for [`TimeoutSet`](crate::controller::timeout::TimeoutSet)
    pub fn callback(self: &Arc<Self>) -> TimerCallback {
        let this = Arc::clone(self);
        Arc::new(move |key: &str| this.requeue(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_requeue_reaches_latest_subscriber() {
        let requeue = Arc::new(TimerRequeue::new());
        let mut stale = requeue.subscribe();
        let mut current = requeue.subscribe();

        (requeue.callback())("ci/build");

        let object_ref = current.next().await.unwrap();
        assert_eq!(object_ref.name, "build");
        assert_eq!(object_ref.namespace.as_deref(), Some("ci"));
        // The replaced sender was dropped, closing the stale stream
        assert!(stale.next().await.is_none());
    }

    #[test]
    fn test_requeue_without_subscriber_is_harmless() {
        TimerRequeue::new().requeue("ci/build");
    }
}

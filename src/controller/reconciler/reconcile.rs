//! # Reconciliation Logic
//!
//! Entry point of a reconciliation pass: resolve the key, take a private copy
//! of the TaskRun, dispatch on terminal state and persist whatever changed.

use super::types::{ErrorList, Reconciler, ReconcilerError, TaskRunKey};
use crate::crd::TaskRun;
use crate::observability;
use chrono::Utc;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, Instrument};

impl Reconciler {
    /// Reconcile the TaskRun identified by `key` (`namespace/name` or `name`).
    ///
    /// Malformed keys and deleted TaskRuns are not errors: retrying them can
    /// never succeed. Any returned error is transient and worth a requeue.
    pub async fn reconcile(&self, key: &str) -> Result<(), ReconcilerError> {
        let key = match TaskRunKey::parse(key) {
            Ok(key) => key,
            Err(e) => {
                error!("{}", e);
                return Ok(());
            }
        };

        let span = tracing::span!(
            tracing::Level::INFO,
            "reconcile",
            resource.name = key.name.as_str(),
            resource.namespace = key.namespace.as_str(),
            resource.kind = "TaskRun"
        );
        self.reconcile_key(&key).instrument(span).await
    }

    async fn reconcile_key(&self, key: &TaskRunKey) -> Result<(), ReconcilerError> {
        let original = match self.task_runs.get(&key.namespace, &key.name).await {
            Ok(tr) => tr,
            Err(e) if e.is_not_found() => {
                info!("TaskRun {} in work queue no longer exists", key);
                let key = key.to_string();
                self.timeouts.release(&key);
                self.tracker.untrack(&key);
                self.metrics.forget(&key);
                if let Ok(mut states) = self.backoff_states.lock() {
                    states.remove(&key);
                }
                return Ok(());
            }
            Err(e) => {
                error!("Failed to get TaskRun {}: {}", key, e);
                return Err(e.into());
            }
        };

        // The fetched object stays untouched; all work happens on the copy
        let mut tr = original.clone();
        prepare_status(&mut tr);

        let result = if tr.is_done() {
            debug!("TaskRun {} is done, finalizing", key);
            self.finalize(&mut tr).await
        } else {
            self.reconcile_active(&mut tr).await
        };

        let mut errors = ErrorList::new();
        if let Err(e) = result {
            error!("Reconcile error for TaskRun {}: {}", key, e);
            errors.push(e);
        }
        errors.check(self.persist(&original, &tr).await);
        errors.into_result()
    }
}

/// Initialize conditions and clamp the start time forward to creation time
fn prepare_status(tr: &mut TaskRun) {
    let now = Utc::now();
    let created = tr.creation_time();
    let status = tr.status_mut();
    status.initialize_conditions(now);
    if let (Some(created), Some(start)) = (created, status.start_time) {
        if start < created {
            status.start_time = Some(created);
        }
    }
}

/// kube-runtime adapter around [`Reconciler::reconcile`]
///
/// Errors are handled by `error_policy()`; a successful pass clears the
/// resource's error backoff. TaskRuns are re-enqueued by watch events and
/// timers, never by a periodic requeue.
pub async fn reconcile(obj: Arc<TaskRun>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let key = obj.key();
    observability::metrics::increment_reconciliations();

    let result = ctx.reconcile(&key).await;
    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result?;

    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(&key) {
            if state.error_count > 0 {
                debug!("Resetting error backoff for {}", key);
            }
            state.reset();
        }
    }
    Ok(Action::await_change())
}

//! Pod lifecycle as seen from the active reconciler: get-or-create, creation
//! failure classification, cancellation and timeout.

use super::types::{Reconciler, ReconcilerError};
use crate::constants::TASK_RUN_LABEL_KEY;
use crate::controller::events::{TaskRunEvent, REASON_BUILD_CREATION_FAILED};
use crate::crd::{format_duration, ConditionReason, ConditionStatus, TaskRun};
use crate::pod::PodBuildError;
use crate::resolve::ResolvedTaskResources;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub(crate) enum PodCreationError {
    #[error(transparent)]
    Build(#[from] PodBuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("pod {0:?} already exists and belongs to another TaskRun")]
    NameTaken(String),
}

impl PodCreationError {
    fn is_exceeded_quota(&self) -> bool {
        matches!(self, PodCreationError::Store(e) if e.is_exceeded_quota())
    }
}

impl Reconciler {
    /// Fetch the TaskRun's pod, creating it when none is recorded or the
    /// recorded one is gone.
    ///
    /// Returns `Ok(None)` when creation failed; the failure is then already
    /// recorded in the TaskRun's condition.
    pub(crate) async fn get_or_create_pod(
        &self,
        tr: &mut TaskRun,
        rtr: &ResolvedTaskResources,
        timeout: Duration,
    ) -> Result<Option<Pod>, ReconcilerError> {
        let namespace = tr.namespace().unwrap_or_default();
        if let Some(pod_name) = tr.pod_name() {
            match self.pods.get(&namespace, pod_name).await {
                Ok(pod) => {
                    // Timers live in memory; re-arm after a controller restart
                    let key = tr.key();
                    if !self.timeouts.is_armed(&key) {
                        let start = tr.start_time().unwrap_or_else(Utc::now);
                        self.timeouts.wait_task_run(&key, start, timeout);
                        debug!("Re-armed timeout for TaskRun {}", key);
                    }
                    return Ok(Some(pod));
                }
                Err(e) if e.is_not_found() => {
                    info!("Pod {} of TaskRun {} not found, recreating", pod_name, tr.key());
                }
                Err(e) => {
                    error!("Error getting pod {:?}: {}", pod_name, e);
                    return Err(e.into());
                }
            }
        }

        match self.create_pod(tr, rtr, &namespace).await {
            Ok(pod) => {
                let key = tr.key();
                self.timeouts.clear_backoff(&key);
                let start = tr.start_time().unwrap_or_else(Utc::now);
                self.timeouts.wait_task_run(&key, start, timeout);
                info!("🚀 Created pod {} for TaskRun {}", pod.name_any(), key);
                Ok(Some(pod))
            }
            Err(e) => {
                self.handle_pod_creation_error(tr, &e, timeout, Utc::now()).await;
                Ok(None)
            }
        }
    }

    async fn create_pod(
        &self,
        tr: &TaskRun,
        rtr: &ResolvedTaskResources,
        namespace: &str,
    ) -> Result<Pod, PodCreationError> {
        let pod = self.pod_builder.build(tr, rtr).await?;
        match self.pods.create(namespace, &pod).await {
            Ok(created) => Ok(created),
            // A previous pass created the pod but failed to record its name
            Err(StoreError::Conflict(_)) => {
                let name = pod.name_any();
                let existing = self.pods.get(namespace, &name).await?;
                if !is_owned_by(&existing, tr) {
                    return Err(PodCreationError::NameTaken(name));
                }
                debug!("Pod {} already exists, adopting it", name);
                Ok(existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_pod_creation_error(
        &self,
        tr: &mut TaskRun,
        err: &PodCreationError,
        timeout: Duration,
        now: DateTime<Utc>,
    ) {
        let (status, reason, message) = if err.is_exceeded_quota() {
            let key = tr.key();
            let start = tr.start_time().unwrap_or(now);
            let (record, backing_off) = self.timeouts.get_backoff_at(&key, start, timeout, now);
            if !backing_off {
                let delay = (record.next_attempt - now).to_std().unwrap_or(Duration::ZERO);
                self.timeouts.set_task_run_timer(&key, delay);
            }
            (
                ConditionStatus::Unknown,
                ConditionReason::ExceededResourceQuota,
                format!(
                    "TaskRun Pod exceeded available resources, reattempted {} times",
                    record.attempts
                ),
            )
        } else {
            let message = match &tr.spec.task_ref {
                Some(task_ref) => format!(
                    "Missing or invalid Task {}/{}",
                    tr.namespace().unwrap_or_default(),
                    task_ref.name
                ),
                None => "Invalid TaskSpec".to_string(),
            };
            (ConditionStatus::False, ConditionReason::CouldntGetTask, message)
        };

        tr.status_mut().mark(status, reason, format!("{message}: {err}"), now);
        self.events
            .publish(
                tr,
                TaskRunEvent::warning(
                    REASON_BUILD_CREATION_FAILED,
                    format!("Failed to create build pod {:?}: {}", tr.name_any(), err),
                ),
            )
            .await;
        error!("Failed to create build pod for TaskRun {}: {}", tr.key(), err);
    }

    /// Delete the TaskRun's pod, tolerating its absence
    async fn delete_pod(&self, tr: &TaskRun) -> Result<(), StoreError> {
        let Some(pod_name) = tr.pod_name() else {
            return Ok(());
        };
        match self.pods.delete(&tr.namespace().unwrap_or_default(), pod_name).await {
            Err(e) if !e.is_not_found() => {
                error!("Failed to delete pod {} of TaskRun {}: {}", pod_name, tr.key(), e);
                Err(e)
            }
            _ => Ok(()),
        }
    }

    /// Mark the TaskRun cancelled and stop its pod
    pub(crate) async fn cancel(&self, tr: &mut TaskRun) -> Result<(), ReconcilerError> {
        info!("🛑 Cancelling TaskRun {}", tr.key());
        let now = Utc::now();
        let message = format!("TaskRun {:?} was cancelled", tr.name_any());
        let status = tr.status_mut();
        status.mark(ConditionStatus::False, ConditionReason::Cancelled, message, now);
        status.completion_time.get_or_insert(now);

        self.timeouts.release(&tr.key());
        self.delete_pod(tr).await?;
        Ok(())
    }

    /// Whether more than `timeout` has elapsed since the TaskRun started.
    ///
    /// A zero timeout never expires.
    pub(crate) fn has_timed_out(tr: &TaskRun, timeout: Duration, now: DateTime<Utc>) -> bool {
        if timeout.is_zero() {
            return false;
        }
        tr.start_time()
            .and_then(|start| (now - start).to_std().ok())
            .is_some_and(|elapsed| elapsed > timeout)
    }

    /// Fail a TaskRun that ran out of time and delete its pod
    pub(crate) async fn fail_timed_out(&self, tr: &mut TaskRun, timeout: Duration) -> Result<(), ReconcilerError> {
        warn!("⏰ TaskRun {} timed out after {}", tr.key(), format_duration(timeout));
        self.delete_pod(tr).await?;

        let now = Utc::now();
        let message = format!(
            "TaskRun {:?} failed to finish within {:?}",
            tr.name_any(),
            format_duration(timeout)
        );
        let status = tr.status_mut();
        status.mark(ConditionStatus::False, ConditionReason::Timeout, message, now);
        status.completion_time = Some(now);
        Ok(())
    }
}

/// Whether `pod` was created for `tr`: its controller owner reference
/// carries the TaskRun's uid, or, lacking one, its TaskRun label names it.
fn is_owned_by(pod: &Pod, tr: &TaskRun) -> bool {
    let controller = pod
        .owner_references()
        .iter()
        .find(|owner| owner.controller == Some(true));
    match (controller, tr.uid()) {
        (Some(owner), Some(uid)) => owner.uid == uid,
        _ => pod.labels().get(TASK_RUN_LABEL_KEY) == Some(&tr.name_any()),
    }
}

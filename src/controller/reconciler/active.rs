//! # Active Reconciliation
//!
//! Drives a TaskRun that is not done yet: resolve what it runs, make sure its
//! pod exists and mirror the pod's progress into the TaskRun status.

use super::results::update_resource_results;
use super::types::{Reconciler, ReconcilerError};
use crate::cloudevent::initialize_cloud_events;
use crate::config::ControllerConfig;
use crate::constants::TASK_LABEL_KEY;
use crate::controller::events::{emit_transition_event, TaskRunEvent, REASON_EXCEEDED_NODE_RESOURCES};
use crate::crd::{ConditionReason, ConditionStatus, TaskKind, TaskRun};
use crate::pod::{is_pod_exceeding_node_resources, make_task_run_status, sidecars_ready, update_ready};
use crate::resolve::{
    get_task_data, resolve_task_resources, validate_resolved_task_resources,
    validate_workspace_bindings, TaskData, TaskLookup,
};
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, error, warn};

/// Fill in defaults older TaskRuns may lack.
///
/// The task reference kind defaults to `Task`, the deprecated
/// `serviceAccount` moves to `serviceAccountName`, and runs naming no service
/// account get the configured default.
pub(crate) fn apply_defaults(tr: &mut TaskRun, config: &ControllerConfig) {
    if let Some(task_ref) = tr.spec.task_ref.as_mut() {
        task_ref.kind.get_or_insert(TaskKind::Task);
    }

    let spec = &mut tr.spec;
    if spec.service_account_name.as_deref().is_none_or(str::is_empty) {
        spec.service_account_name = spec.service_account.take().filter(|sa| !sa.is_empty());
    }
    if spec.service_account_name.is_none() {
        spec.service_account_name = Some(config.default_service_account.clone());
    }
}

/// Copy the task's labels and annotations onto the TaskRun, then label it
/// with the referenced task's name.
fn propagate_task_metadata(tr: &mut TaskRun, task: &TaskData) {
    let uses_ref = tr.spec.task_ref.is_some();
    let labels = tr.labels_mut();
    for (key, value) in &task.labels {
        labels.insert(key.clone(), value.clone());
    }
    if uses_ref {
        labels.insert(TASK_LABEL_KEY.to_string(), task.name.clone());
    }

    let annotations = tr.annotations_mut();
    for (key, value) in &task.annotations {
        annotations.insert(key.clone(), value.clone());
    }
}

impl Reconciler {
    pub(crate) async fn reconcile_active(&self, tr: &mut TaskRun) -> Result<(), ReconcilerError> {
        apply_defaults(tr, &self.config);

        if tr.is_cancelled() {
            let before = tr.status.as_ref().and_then(|s| s.succeeded_condition()).cloned();
            let result = self.cancel(tr).await;
            let after = tr.status.as_ref().and_then(|s| s.succeeded_condition());
            emit_transition_event(self.events.as_ref(), tr, before.as_ref(), after).await;
            return result;
        }

        let lookup = TaskLookup::for_task_run(tr);
        let task = match get_task_data(self.tasks.as_ref(), tr, &lookup).await {
            Ok(task) => task,
            Err(e) => {
                error!("Failed to determine Task spec to use for TaskRun {}: {}", tr.key(), e);
                tr.status_mut().mark(
                    ConditionStatus::False,
                    ConditionReason::ResolutionFailed,
                    e.to_string(),
                    Utc::now(),
                );
                return Ok(());
            }
        };

        propagate_task_metadata(tr, &task);

        let timeout = match tr.timeout() {
            Ok(timeout) => timeout.unwrap_or_else(|| self.config.default_timeout()),
            Err(e) => {
                error!("TaskRun {} has an invalid timeout: {}", tr.key(), e);
                tr.status_mut().mark(
                    ConditionStatus::False,
                    ConditionReason::ValidationFailed,
                    format!("invalid timeout: {e}"),
                    Utc::now(),
                );
                return Ok(());
            }
        };
        if Self::has_timed_out(tr, timeout, Utc::now()) {
            let before = tr.status.as_ref().and_then(|s| s.succeeded_condition()).cloned();
            let result = self.fail_timed_out(tr, timeout).await;
            let after = tr.status.as_ref().and_then(|s| s.succeeded_condition());
            emit_transition_event(self.events.as_ref(), tr, before.as_ref(), after).await;
            return result;
        }

        let rtr = match resolve_task_resources(self.resources.as_ref(), tr, &task, lookup.kind()).await {
            Ok(rtr) => rtr,
            Err(e) => {
                error!("Failed to resolve references for TaskRun {}: {}", tr.key(), e);
                tr.status_mut().mark(
                    ConditionStatus::False,
                    ConditionReason::ResolutionFailed,
                    e.to_string(),
                    Utc::now(),
                );
                return Ok(());
            }
        };

        let params = tr.spec.inputs.as_ref().map(|i| i.params.as_slice()).unwrap_or_default();
        let validation = validate_resolved_task_resources(params, &rtr)
            .and_then(|()| validate_workspace_bindings(&rtr.task_spec.workspaces, &tr.spec.workspaces));
        if let Err(e) = validation {
            error!("TaskRun {} resources are invalid: {}", tr.key(), e);
            tr.status_mut().mark(
                ConditionStatus::False,
                ConditionReason::ValidationFailed,
                e.to_string(),
                Utc::now(),
            );
            return Ok(());
        }

        initialize_cloud_events(tr.status_mut(), &rtr.outputs);

        let Some(pod) = self.get_or_create_pod(tr, &rtr, timeout).await? else {
            return Ok(());
        };

        self.tracker
            .track(&pod.namespace().unwrap_or_default(), &pod.name_any(), &tr.key())?;

        if is_pod_exceeding_node_resources(&pod) {
            warn!("Pod {} of TaskRun {} cannot be scheduled", pod.name_any(), tr.key());
            self.events
                .publish(
                    tr,
                    TaskRunEvent::warning(
                        REASON_EXCEEDED_NODE_RESOURCES,
                        format!("Insufficient resources to schedule pod {:?}", pod.name_any()),
                    ),
                )
                .await;
        }

        if pod.status.as_ref().is_some_and(sidecars_ready) {
            debug!("Sidecars of pod {} are ready", pod.name_any());
            update_ready(self.pods.as_ref(), &pod).await?;
        }

        let before = tr.status.as_ref().and_then(|s| s.succeeded_condition()).cloned();
        let status = make_task_run_status(tr, &pod, &rtr.task_spec, Utc::now());
        tr.status = Some(status);
        update_resource_results(tr, &pod)?;

        let after = tr.status.as_ref().and_then(|s| s.succeeded_condition());
        emit_transition_event(self.events.as_ref(), tr, before.as_ref(), after).await;
        Ok(())
    }
}

//! # Events
//!
//! Kubernetes events published about TaskRuns.
//!
//! Transition events are derived by comparing the Succeeded condition before
//! and after a reconciliation pass: a TaskRun that started running emits
//! `Started`, one that finished emits `Succeeded` or `Failed`, and any later
//! change of an Unknown condition emits an event named after its reason.

use crate::crd::{Condition, ConditionStatus, TaskRun};
use async_trait::async_trait;
use kube::Resource;
use kube_runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use tracing::warn;

pub const REASON_STARTED: &str = "Started";
pub const REASON_SUCCEEDED: &str = "Succeeded";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_BUILD_CREATION_FAILED: &str = "BuildCreationFailed";
pub const REASON_EXCEEDED_NODE_RESOURCES: &str = "ExceededNodeResources";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl TaskRunEvent {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Publishes events about a TaskRun.
///
/// Publishing is best effort: implementations log failures instead of
/// returning them, so an unreachable events API never fails a reconciliation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, task_run: &TaskRun, event: TaskRunEvent);
}

/// Event for a change of the Succeeded condition, if any
pub fn transition_event(before: Option<&Condition>, after: Option<&Condition>) -> Option<TaskRunEvent> {
    let after = after?;
    if before.is_some_and(|b| b.same_state(after)) {
        return None;
    }

    match after.status {
        ConditionStatus::True => Some(TaskRunEvent::normal(REASON_SUCCEEDED, after.message.clone())),
        ConditionStatus::False => Some(TaskRunEvent::warning(REASON_FAILED, after.message.clone())),
        ConditionStatus::Unknown => {
            // A fresh condition carries no reason yet
            let fresh = before.is_none_or(|b| b.is_unknown() && b.reason.is_empty());
            if fresh {
                Some(TaskRunEvent::normal(REASON_STARTED, after.message.clone()))
            } else if after.reason.is_empty() {
                None
            } else {
                Some(TaskRunEvent::normal(after.reason.clone(), after.message.clone()))
            }
        }
    }
}

/// Publish the transition event between `before` and `after`, if any
pub async fn emit_transition_event(
    sink: &dyn EventSink,
    task_run: &TaskRun,
    before: Option<&Condition>,
    after: Option<&Condition>,
) {
    if let Some(event) = transition_event(before, after) {
        sink.publish(task_run, event).await;
    }
}

/// [`EventSink`] backed by the kube-runtime event recorder
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    pub fn new(client: kube::Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, task_run: &TaskRun, event: TaskRunEvent) {
        let type_ = match event.event_type {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        };
        let kube_event = Event {
            type_,
            reason: event.reason.clone(),
            note: (!event.message.is_empty()).then(|| event.message.clone()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        let reference = task_run.object_ref(&());
        if let Err(e) = self.recorder.publish(&kube_event, &reference).await {
            warn!(
                reason = event.reason.as_str(),
                task_run = task_run.key().as_str(),
                "Failed to publish event: {}",
                e
            );
        }
    }
}

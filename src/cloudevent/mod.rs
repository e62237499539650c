//! # Cloud Events
//!
//! Completion notifications for TaskRuns with `cloudEvent` output resources.
//!
//! Each target URI gets one [`CloudEventDelivery`] entry in TaskRun status.
//! Delivery is attempted while the TaskRun is done; a failed delivery is
//! retried on later passes until `max_attempts` is reached, after which it
//! stays `Failed` and no longer holds up cleanup.

mod http;

pub use http::HttpCloudEventClient;

use crate::constants::GROUP_NAME;
use crate::crd::{
    CloudEventCondition, CloudEventDelivery, CloudEventDeliveryState, PipelineResourceType,
    TaskRun, TaskRunStatus,
};
use crate::resolve::ResolvedResource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Param of a `cloudEvent` PipelineResource holding the sink URI
pub const TARGET_URI_PARAM: &str = "targetURI";

pub const EVENT_TYPE_SUCCESSFUL: &str = "dev.tekton.event.task.successful.v1";
pub const EVENT_TYPE_FAILED: &str = "dev.tekton.event.task.failed.v1";
pub const EVENT_TYPE_UNKNOWN: &str = "dev.tekton.event.task.unknown.v1";

#[derive(Debug, Error)]
pub enum CloudEventError {
    #[error("failed to encode cloud event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send cloud event to {target}: {source}")]
    Http {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cloud event sink {target} answered {status}")]
    Rejected { target: String, status: u16 },
    #[error("{0}")]
    Delivery(String),
    #[error("failed to deliver cloud events: {}", .0.join("; "))]
    Undelivered(Vec<String>),
}

/// A CloudEvents 1.0 event carrying the TaskRun as data
#[derive(Debug, Clone, Serialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub data: serde_json::Value,
}

impl CloudEvent {
    /// Event describing the current outcome of `tr`
    pub fn for_task_run(tr: &TaskRun) -> Result<Self, CloudEventError> {
        let r#type = match tr
            .status
            .as_ref()
            .and_then(TaskRunStatus::succeeded_condition)
        {
            Some(c) if c.is_true() => EVENT_TYPE_SUCCESSFUL,
            Some(c) if c.is_false() => EVENT_TYPE_FAILED,
            _ => EVENT_TYPE_UNKNOWN,
        };
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: format!(
                "/apis/{}/v1alpha1/namespaces/{}/taskruns/{}",
                GROUP_NAME,
                tr.namespace().unwrap_or_default(),
                tr.name_any()
            ),
            r#type: r#type.to_string(),
            data: serde_json::json!({ "taskRun": serde_json::to_value(tr)? }),
        })
    }
}

/// Delivers one event to one sink
#[async_trait]
pub trait CloudEventClient: Send + Sync {
    async fn send(&self, target: &str, event: &CloudEvent) -> Result<(), CloudEventError>;
}

/// Record a pending delivery for every `cloudEvent` output whose target is not
/// tracked yet.
pub fn initialize_cloud_events(
    status: &mut TaskRunStatus,
    outputs: &BTreeMap<String, ResolvedResource>,
) {
    for resource in outputs.values() {
        if resource.spec.r#type != PipelineResourceType::CloudEvent {
            continue;
        }
        let Some(target) = resource.spec.param(TARGET_URI_PARAM) else {
            warn!(
                resource = resource.name.as_str(),
                "cloudEvent resource has no {} param", TARGET_URI_PARAM
            );
            continue;
        };
        if status.cloud_events.iter().any(|ce| ce.target == target) {
            continue;
        }
        status.cloud_events.push(CloudEventDelivery {
            target: target.to_string(),
            status: CloudEventDeliveryState::default(),
        });
    }
}

/// Attempt every delivery that is neither sent nor out of attempts.
///
/// Delivery bookkeeping is written into `tr`'s status. Returns an error when
/// any attempt in this pass failed.
pub async fn send_cloud_events(
    client: &dyn CloudEventClient,
    tr: &mut TaskRun,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<(), CloudEventError> {
    let pending = tr.status.as_ref().is_some_and(|s| {
        s.cloud_events
            .iter()
            .any(|ce| is_pending(&ce.status, max_attempts))
    });
    if !pending {
        return Ok(());
    }

    let event = CloudEvent::for_task_run(tr)?;
    let name = tr.name_any();
    let mut failures = Vec::new();

    for delivery in &mut tr.status_mut().cloud_events {
        if !is_pending(&delivery.status, max_attempts) {
            continue;
        }
        let result = client.send(&delivery.target, &event).await;
        delivery.status.sent_at = Some(now);
        delivery.status.retry_count += 1;
        match result {
            Ok(()) => {
                delivery.status.condition = CloudEventCondition::Sent;
                delivery.status.message.clear();
                info!(
                    resource.name = name.as_str(),
                    target = delivery.target.as_str(),
                    r#type = event.r#type.as_str(),
                    "📨 Sent cloud event"
                );
            }
            Err(e) => {
                delivery.status.condition = CloudEventCondition::Failed;
                delivery.status.message = e.to_string();
                if delivery.status.retry_count >= max_attempts {
                    warn!(
                        resource.name = name.as_str(),
                        target = delivery.target.as_str(),
                        attempts = delivery.status.retry_count,
                        "Giving up on cloud event delivery: {}",
                        e
                    );
                }
                failures.push(format!("{}: {}", delivery.target, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CloudEventError::Undelivered(failures))
    }
}

fn is_pending(state: &CloudEventDeliveryState, max_attempts: u32) -> bool {
    state.condition != CloudEventCondition::Sent && state.retry_count < max_attempts
}

//! # TaskRun
//!
//! The TaskRun resource: one execution of a Task (by reference or embedded).
//!
//! Spec is written by users; status is written only by this controller.

use super::condition::{
    set_condition, Condition, ConditionReason, ConditionStatus, CONDITION_SUCCEEDED,
};
use super::duration::{parse_duration, DurationError};
use super::resource::{PipelineResourceRef, TaskResourceBinding};
use super::task::{Param, TaskSpec};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "TaskRun",
    group = "tekton.dev",
    version = "v1alpha1",
    namespaced,
    status = "TaskRunStatus",
    shortname = "tr",
    printcolumn = r#"{"name":"Succeeded", "type":"string", "jsonPath":".status.conditions[?(@.type=='Succeeded')].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type=='Succeeded')].reason"}"#,
    printcolumn = r#"{"name":"StartTime", "type":"date", "jsonPath":".status.startTime"}"#,
    printcolumn = r#"{"name":"CompletionTime", "type":"date", "jsonPath":".status.completionTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<TaskRunInputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<TaskRunOutputs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Deprecated, migrated to `serviceAccountName` during defaulting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Time after which the TaskRun fails, e.g. `1h0m0s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Set to `TaskRunCancelled` to cancel the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskRunSpecStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum TaskRunSpecStatus {
    #[serde(rename = "TaskRunCancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub enum TaskKind {
    #[default]
    Task,
    ClusterTask,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct TaskRunInputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<TaskResourceBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct TaskRunOutputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<TaskResourceBinding>,
}

/// Volume source bound to a declared workspace
///
/// Exactly one source must be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretSource>,
}

impl WorkspaceBinding {
    /// Number of volume sources set on this binding
    pub fn source_count(&self) -> usize {
        [
            self.empty_dir.is_some(),
            self.persistent_volume_claim.is_some(),
            self.config_map.is_some(),
            self.secret.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSource {
    pub claim_name: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ConfigMapSource {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
}

/// Observed state of a TaskRun
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Name of the backing pod once created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ContainerRunState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<ContainerRunState>,
    /// Results written by steps through their termination message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_result: Vec<PipelineResourceResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cloud_events: Vec<CloudEventDelivery>,
}

impl TaskRunStatus {
    pub fn get_condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// The authoritative `Succeeded` condition
    pub fn succeeded_condition(&self) -> Option<&Condition> {
        self.get_condition(CONDITION_SUCCEEDED)
    }

    pub fn set_condition(&mut self, condition: Condition, now: DateTime<Utc>) {
        set_condition(&mut self.conditions, condition, now);
    }

    /// Set the `Succeeded` condition from its parts
    pub fn mark(
        &mut self,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.set_condition(Condition::succeeded(status, reason, message), now);
    }

    /// Set the start time (first call only) and a `Succeeded=Unknown` condition
    /// when none exists yet.
    pub fn initialize_conditions(&mut self, now: DateTime<Utc>) {
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
        if self.succeeded_condition().is_none() {
            self.set_condition(
                Condition::succeeded(ConditionStatus::Unknown, "", ""),
                now,
            );
        }
    }
}

/// State of a step or sidecar container as reported in TaskRun status
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRunState {
    pub name: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "imageID")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<ContainerWaiting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<ContainerRunning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerTerminated>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ContainerWaiting {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRunning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTerminated {
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Key/value result written by a step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResourceResult {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<PipelineResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

/// Delivery bookkeeping for one cloud-event target
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventDelivery {
    pub target: String,
    pub status: CloudEventDeliveryState,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventDeliveryState {
    pub condition: CloudEventCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub enum CloudEventCondition {
    #[default]
    Unknown,
    Sent,
    Failed,
}

impl TaskRun {
    /// `namespace/name` key used for timers, backoff and metrics bookkeeping
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// A TaskRun is done once its `Succeeded` condition is True or False
    pub fn is_done(&self) -> bool {
        self.status
            .as_ref()
            .and_then(TaskRunStatus::succeeded_condition)
            .is_some_and(|c| !c.is_unknown())
    }

    pub fn is_successful(&self) -> bool {
        self.status
            .as_ref()
            .and_then(TaskRunStatus::succeeded_condition)
            .is_some_and(Condition::is_true)
    }

    pub fn is_cancelled(&self) -> bool {
        self.spec.status == Some(TaskRunSpecStatus::Cancelled)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.start_time)
    }

    pub fn pod_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.pod_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Parsed `spec.timeout`, `None` when unset
    pub fn timeout(&self) -> Result<Option<Duration>, DurationError> {
        self.spec.timeout.as_deref().map(parse_duration).transpose()
    }

    /// Name of the referenced task, if the run uses a reference
    pub fn task_name(&self) -> Option<&str> {
        self.spec.task_ref.as_ref().map(|r| r.name.as_str())
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .creation_timestamp
            .as_ref()
            .and_then(crate::crd::time_to_chrono)
    }

    pub fn status_mut(&mut self) -> &mut TaskRunStatus {
        self.status.get_or_insert_with(TaskRunStatus::default)
    }
}

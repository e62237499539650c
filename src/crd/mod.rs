//! # Custom Resource Definitions
//!
//! CRD types for the TaskRun controller.
//!
//! ## Module Structure
//!
//! - `taskrun.rs` - TaskRun spec and status
//! - `task.rs` - Task / ClusterTask and the task specification structures
//! - `resource.rs` - PipelineResource and resource bindings
//! - `condition.rs` - The `Succeeded` condition and its reasons
//! - `duration.rs` - Timeout parsing and formatting

mod condition;
mod duration;
mod resource;
mod task;
mod taskrun;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub use condition::{
    set_condition, Condition, ConditionReason, ConditionStatus, CONDITION_SUCCEEDED,
};
pub use duration::{format_duration, parse_duration, DurationError};
pub use resource::{
    PipelineResource, PipelineResourceRef, PipelineResourceSpec, PipelineResourceType,
    ResourceParam, TaskResourceBinding,
};
pub use task::{
    ArrayOrString, ClusterTask, ClusterTaskSpec, ComputeResources, EnvVar, Inputs, Outputs,
    Param, ParamSpec, ParamType, Step, Task, TaskResource, TaskSpec, WorkspaceDeclaration,
};
pub use taskrun::{
    CloudEventCondition, CloudEventDelivery, CloudEventDeliveryState, ConfigMapSource,
    ContainerRunState, ContainerRunning, ContainerTerminated, ContainerWaiting, EmptyDirSource,
    PersistentVolumeClaimSource, PipelineResourceResult, SecretSource, TaskKind, TaskRef,
    TaskRun, TaskRunInputs, TaskRunOutputs, TaskRunSpec, TaskRunSpecStatus, TaskRunStatus,
    WorkspaceBinding,
};

/// Convert an API timestamp into chrono.
///
/// Goes through the RFC3339 wire form so it does not depend on which time
/// library backs `Time`.
pub fn time_to_chrono(time: &Time) -> Option<DateTime<Utc>> {
    serde_json::to_value(time)
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Convert a chrono timestamp into an API timestamp.
pub fn chrono_to_time(time: DateTime<Utc>) -> Option<Time> {
    serde_json::from_value(serde_json::Value::String(
        time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    ))
    .ok()
}

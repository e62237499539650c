//! # Task and ClusterTask
//!
//! Structural subset of the task specification language the controller needs:
//! declared inputs/outputs, params, steps, sidecars and workspaces.

use super::resource::PipelineResourceType;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Task definition, namespaced
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Task",
    group = "tekton.dev",
    version = "v1alpha1",
    namespaced,
    shortname = "task"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Inputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Outputs>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceDeclaration>,
}

/// Cluster-scoped task definition, same shape as [`TaskSpec`]
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ClusterTask",
    group = "tekton.dev",
    version = "v1alpha1",
    shortname = "clustertask"
)]
pub struct ClusterTaskSpec {
    #[serde(flatten)]
    pub task: TaskSpec,
}

impl TaskSpec {
    /// Declared input params
    pub fn params(&self) -> &[ParamSpec] {
        self.inputs.as_ref().map_or(&[], |i| i.params.as_slice())
    }

    pub fn input_resources(&self) -> &[TaskResource] {
        self.inputs.as_ref().map_or(&[], |i| i.resources.as_slice())
    }

    pub fn output_resources(&self) -> &[TaskResource] {
        self.outputs.as_ref().map_or(&[], |o| o.resources.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Inputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<TaskResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Outputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<TaskResource>,
}

/// A resource slot declared by a task
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResource {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: PipelineResourceType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ParamType {
    #[default]
    String,
    Array,
}

/// A param declared by a task
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub r#type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArrayOrString>,
}

/// A param value supplied by a TaskRun
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct Param {
    pub name: String,
    pub value: ArrayOrString,
}

/// Param value, either a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ArrayOrString {
    String(String),
    Array(Vec<String>),
}

impl ArrayOrString {
    #[must_use]
    pub fn param_type(&self) -> ParamType {
        match self {
            ArrayOrString::String(_) => ParamType::String,
            ArrayOrString::Array(_) => ParamType::Array,
        }
    }
}

// Structural schemas cannot express "string or array", so the field is left open.
impl schemars::JsonSchema for ArrayOrString {
    fn schema_name() -> Cow<'static, str> {
        "ArrayOrString".into()
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "x-kubernetes-preserve-unknown-fields": true
        })
    }
}

/// A container run by the task, either as a step or as a sidecar
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Inline script, run with `/bin/sh` when no command is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComputeResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Container resource requests/limits as quantity strings (`"500m"`, `"1Gi"`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ComputeResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// A workspace the task expects to be bound by the TaskRun
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl WorkspaceDeclaration {
    /// Mount path inside step containers, `/workspace/<name>` unless declared
    pub fn effective_mount_path(&self) -> String {
        match self.mount_path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => format!("/workspace/{}", self.name),
        }
    }
}

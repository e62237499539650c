//! # PipelineResource
//!
//! Typed inputs/outputs bound to a TaskRun: git repositories, images, storage
//! buckets, pull requests, clusters and cloud-event sinks.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "PipelineResource",
    group = "tekton.dev",
    version = "v1alpha1",
    namespaced,
    shortname = "pipelineresource"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResourceSpec {
    #[serde(rename = "type")]
    pub r#type: PipelineResourceType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ResourceParam>,
}

impl PipelineResourceSpec {
    /// Value of the param `name`, compared case-insensitively
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PipelineResourceType {
    Git,
    Image,
    Storage,
    PullRequest,
    Cluster,
    CloudEvent,
}

impl PipelineResourceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineResourceType::Git => "git",
            PipelineResourceType::Image => "image",
            PipelineResourceType::Storage => "storage",
            PipelineResourceType::PullRequest => "pullRequest",
            PipelineResourceType::Cluster => "cluster",
            PipelineResourceType::CloudEvent => "cloudEvent",
        }
    }
}

impl std::fmt::Display for PipelineResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ResourceParam {
    pub name: String,
    pub value: String,
}

/// Reference to a PipelineResource in the TaskRun's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResourceRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Binding of a declared task resource to a concrete resource
///
/// Either `resourceRef` names an existing PipelineResource or `resourceSpec`
/// embeds one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResourceBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<PipelineResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_spec: Option<PipelineResourceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

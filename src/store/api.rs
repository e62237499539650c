//! # API Server Clients
//!
//! `kube::Api` backed implementations of the store traits.

use super::{
    MetadataPatch, PipelineResourceClient, PodClient, StoreError, TaskClient, TaskRunClient,
};
use crate::crd::{ClusterTask, PipelineResource, Task, TaskRun, TaskRunStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Top-level status fields, written explicitly so cleared fields become `null`
/// in the merge patch instead of being left behind.
const STATUS_FIELDS: &[&str] = &[
    "conditions",
    "podName",
    "startTime",
    "completionTime",
    "steps",
    "sidecars",
    "resourcesResult",
    "cloudEvents",
];

fn status_patch(resource_version: Option<&str>, status: &TaskRunStatus) -> Result<Value, StoreError> {
    let mut fields = match serde_json::to_value(status) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => return Err(StoreError::Other(format!("failed to serialize status: {e}"))),
    };
    for field in STATUS_FIELDS {
        fields.entry((*field).to_string()).or_insert(Value::Null);
    }

    let mut patch = json!({ "status": Value::Object(fields) });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

fn metadata_patch(patch: &MetadataPatch) -> Value {
    let mut metadata = Map::new();
    if let Some(rv) = &patch.resource_version {
        metadata.insert("resourceVersion".to_string(), json!(rv));
    }
    if !patch.labels.is_empty() {
        metadata.insert("labels".to_string(), json!(patch.labels));
    }
    if !patch.annotations.is_empty() {
        metadata.insert("annotations".to_string(), json!(patch.annotations));
    }
    json!({ "metadata": Value::Object(metadata) })
}

#[derive(Clone)]
pub struct KubeTaskRunClient {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for KubeTaskRunClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTaskRunClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeTaskRunClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<TaskRun> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }
}

#[async_trait]
impl TaskRunClient for KubeTaskRunClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<TaskRun, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("TaskRun", name, e))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<TaskRun>, StoreError> {
        let api: Api<TaskRun> = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube("TaskRun", "", e))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &TaskRunStatus,
    ) -> Result<TaskRun, StoreError> {
        let patch = status_patch(resource_version, status)?;
        let updated = self
            .api(namespace)
            .patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube("TaskRun", name, e))?;
        debug!(
            resource.name = name,
            resource.namespace = namespace,
            resource.version = updated.resource_version().unwrap_or_default(),
            "TaskRun status patched"
        );
        Ok(updated)
    }

    async fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<TaskRun, StoreError> {
        let body = metadata_patch(patch);
        self.api(namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(&body))
            .await
            .map_err(|e| StoreError::from_kube("TaskRun", name, e))
    }
}

#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl std::fmt::Debug for KubePodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePodClient").finish_non_exhaustive()
    }
}

impl KubePodClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("Pod", name, e))
    }

    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let name = pod.name_any();
        self.api(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| StoreError::from_kube("Pod", &name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube("Pod", name, e))
    }

    async fn replace(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let name = pod.name_any();
        self.api(namespace)
            .replace(&name, &PostParams::default(), pod)
            .await
            .map_err(|e| StoreError::from_kube("Pod", &name, e))
    }
}

#[derive(Clone)]
pub struct KubeTaskClient {
    client: Client,
}

impl std::fmt::Debug for KubeTaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTaskClient").finish_non_exhaustive()
    }
}

impl KubeTaskClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskClient for KubeTaskClient {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, StoreError> {
        Api::<Task>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("Task", name, e))
    }

    async fn get_cluster_task(&self, name: &str) -> Result<ClusterTask, StoreError> {
        Api::<ClusterTask>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("ClusterTask", name, e))
    }
}

#[derive(Clone)]
pub struct KubePipelineResourceClient {
    client: Client,
}

impl std::fmt::Debug for KubePipelineResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePipelineResourceClient")
            .finish_non_exhaustive()
    }
}

impl KubePipelineResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineResourceClient for KubePipelineResourceClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<PipelineResource, StoreError> {
        Api::<PipelineResource>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("PipelineResource", name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, ConditionReason, ConditionStatus};

    #[test]
    fn test_status_patch_nulls_cleared_fields() {
        let mut status = TaskRunStatus::default();
        status.conditions.push(Condition::succeeded(
            ConditionStatus::Unknown,
            ConditionReason::Pending,
            "",
        ));
        let patch = status_patch(Some("42"), &status).unwrap();

        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert!(patch["status"]["completionTime"].is_null());
        assert!(patch["status"].get("completionTime").is_some());
        assert_eq!(patch["status"]["conditions"][0]["reason"], "Pending");
    }

    #[test]
    fn test_metadata_patch_removes_keys_with_null() {
        let mut patch = MetadataPatch {
            resource_version: Some("7".to_string()),
            ..MetadataPatch::default()
        };
        patch
            .labels
            .insert("tekton.dev/task".to_string(), Some("build".to_string()));
        patch.annotations.insert("stale".to_string(), None);

        let body = metadata_patch(&patch);
        assert_eq!(body["metadata"]["labels"]["tekton.dev/task"], "build");
        assert!(body["metadata"]["annotations"]["stale"].is_null());
        assert_eq!(body["metadata"]["resourceVersion"], "7");
    }
}

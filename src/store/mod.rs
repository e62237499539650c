//! # Store
//!
//! Narrow client interfaces over the API server used by the reconciler.
//!
//! The reconciler never touches `kube::Api` directly. It receives these traits
//! at construction so tests can drive it with in-memory stores; [`api`]
//! holds the implementations backed by a real `kube::Client`.

pub mod api;

use crate::crd::{ClusterTask, PipelineResource, Task, TaskRun, TaskRunStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Classify a kube client error by its HTTP status
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(api_err) if api_err.code == 403 => {
                StoreError::Forbidden(api_err.message)
            }
            kube::Error::Api(api_err) if api_err.code == 409 => {
                StoreError::Conflict(api_err.message)
            }
            kube::Error::Api(api_err) if api_err.code == 422 => {
                StoreError::Invalid(api_err.message)
            }
            other => StoreError::Kube(other),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Forbidden by a namespace ResourceQuota
    #[must_use]
    pub fn is_exceeded_quota(&self) -> bool {
        matches!(self, StoreError::Forbidden(message) if message.contains("exceeded quota"))
    }
}

/// Label/annotation changes written as one merge patch.
///
/// A `None` value removes the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

#[async_trait]
pub trait TaskRunClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<TaskRun, StoreError>;

    /// List TaskRuns in `namespace`, or across all namespaces
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<TaskRun>, StoreError>;

    /// Write the status subresource, guarded by `resource_version` when given
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &TaskRunStatus,
    ) -> Result<TaskRun, StoreError>;

    async fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<TaskRun, StoreError>;
}

#[async_trait]
pub trait PodClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;
    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
    /// Replace the pod (used for sidecar image swaps and the readiness annotation)
    async fn replace(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError>;
}

#[async_trait]
pub trait TaskClient: Send + Sync {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, StoreError>;
    async fn get_cluster_task(&self, name: &str) -> Result<ClusterTask, StoreError>;
}

#[async_trait]
pub trait PipelineResourceClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<PipelineResource, StoreError>;
}

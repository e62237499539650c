//! # Resolution
//!
//! Turns a TaskRun's references into concrete data: the task spec it runs and
//! the PipelineResources bound to its declared inputs and outputs.
//!
//! Nothing here is cached; each reconciliation pass resolves afresh.

mod validation;

pub use validation::{validate_resolved_task_resources, validate_workspace_bindings, ValidationError};

use crate::crd::{
    PipelineResourceSpec, TaskKind, TaskResourceBinding, TaskRun, TaskSpec,
};
use crate::store::{PipelineResourceClient, StoreError, TaskClient};
use kube::ResourceExt;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("TaskRun {0} must specify either taskRef or taskSpec")]
    NoTask(String),
    #[error("error when listing tasks for taskRun {task_run}: {source}")]
    TaskLookup {
        task_run: String,
        #[source]
        source: StoreError,
    },
    #[error("couldn't retrieve referenced PipelineResource {name:?}: {source}")]
    ResourceLookup {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("resource binding {0:?} must specify either resourceRef or resourceSpec")]
    EmptyBinding(String),
}

/// Where the task spec comes from, decided once per pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLookup {
    Namespaced { namespace: String, name: String },
    Cluster { name: String },
    Embedded,
}

impl TaskLookup {
    pub fn for_task_run(tr: &TaskRun) -> Self {
        match &tr.spec.task_ref {
            Some(task_ref) if task_ref.kind == Some(TaskKind::ClusterTask) => TaskLookup::Cluster {
                name: task_ref.name.clone(),
            },
            Some(task_ref) => TaskLookup::Namespaced {
                namespace: tr.namespace().unwrap_or_default(),
                name: task_ref.name.clone(),
            },
            None => TaskLookup::Embedded,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskLookup::Cluster { .. } => TaskKind::ClusterTask,
            TaskLookup::Namespaced { .. } | TaskLookup::Embedded => TaskKind::Task,
        }
    }
}

/// Task metadata and spec a TaskRun executes
#[derive(Debug, Clone, PartialEq)]
pub struct TaskData {
    /// Task name, or the TaskRun name for embedded specs
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub spec: TaskSpec,
}

/// Fetch the task spec a TaskRun refers to, or take its embedded spec
pub async fn get_task_data(
    tasks: &dyn TaskClient,
    tr: &TaskRun,
    lookup: &TaskLookup,
) -> Result<TaskData, ResolutionError> {
    let lookup_err = |source| ResolutionError::TaskLookup {
        task_run: tr.name_any(),
        source,
    };

    match lookup {
        TaskLookup::Namespaced { namespace, name } => {
            let task = tasks.get_task(namespace, name).await.map_err(lookup_err)?;
            Ok(TaskData {
                name: task.name_any(),
                labels: task.labels().clone(),
                annotations: task.annotations().clone(),
                spec: task.spec,
            })
        }
        TaskLookup::Cluster { name } => {
            let task = tasks.get_cluster_task(name).await.map_err(lookup_err)?;
            Ok(TaskData {
                name: task.name_any(),
                labels: task.labels().clone(),
                annotations: task.annotations().clone(),
                spec: task.spec.task,
            })
        }
        TaskLookup::Embedded => {
            let spec = tr
                .spec
                .task_spec
                .clone()
                .ok_or_else(|| ResolutionError::NoTask(tr.name_any()))?;
            Ok(TaskData {
                name: tr.name_any(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
                spec,
            })
        }
    }
}

/// A bound PipelineResource, by its object name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub name: String,
    pub spec: PipelineResourceSpec,
}

/// Everything needed to build the TaskRun's pod
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTaskResources {
    pub task_name: String,
    pub kind: TaskKind,
    pub task_spec: TaskSpec,
    /// Keyed by the binding name (the declared task resource name)
    pub inputs: BTreeMap<String, ResolvedResource>,
    pub outputs: BTreeMap<String, ResolvedResource>,
}

async fn resolve_bindings(
    resources: &dyn PipelineResourceClient,
    namespace: &str,
    bindings: &[TaskResourceBinding],
) -> Result<BTreeMap<String, ResolvedResource>, ResolutionError> {
    let mut resolved = BTreeMap::new();
    for binding in bindings {
        let resource = if let Some(resource_ref) = &binding.resource_ref {
            let pr = resources
                .get(namespace, &resource_ref.name)
                .await
                .map_err(|source| ResolutionError::ResourceLookup {
                    name: resource_ref.name.clone(),
                    source,
                })?;
            ResolvedResource {
                name: pr.name_any(),
                spec: pr.spec,
            }
        } else if let Some(spec) = &binding.resource_spec {
            ResolvedResource {
                name: binding.name.clone(),
                spec: spec.clone(),
            }
        } else {
            return Err(ResolutionError::EmptyBinding(binding.name.clone()));
        };
        debug!(
            binding = binding.name.as_str(),
            resource = resource.name.as_str(),
            r#type = %resource.spec.r#type,
            "Resolved resource binding"
        );
        resolved.insert(binding.name.clone(), resource);
    }
    Ok(resolved)
}

/// Resolve the input and output resource bindings of a TaskRun
pub async fn resolve_task_resources(
    resources: &dyn PipelineResourceClient,
    tr: &TaskRun,
    task: &TaskData,
    kind: TaskKind,
) -> Result<ResolvedTaskResources, ResolutionError> {
    let namespace = tr.namespace().unwrap_or_default();
    let input_bindings = tr
        .spec
        .inputs
        .as_ref()
        .map_or(&[][..], |i| i.resources.as_slice());
    let output_bindings = tr
        .spec
        .outputs
        .as_ref()
        .map_or(&[][..], |o| o.resources.as_slice());

    Ok(ResolvedTaskResources {
        task_name: task.name.clone(),
        kind,
        task_spec: task.spec.clone(),
        inputs: resolve_bindings(resources, &namespace, input_bindings).await?,
        outputs: resolve_bindings(resources, &namespace, output_bindings).await?,
    })
}

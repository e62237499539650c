//! # Pod
//!
//! Everything about the backing pod of a TaskRun that does not need the
//! reconciler: building it, reading its status back into TaskRun status,
//! the sidecar readiness gate and sidecar shutdown.

mod builder;
mod sidecars;
mod status;
mod termination;

pub use builder::{pod_name_for, StandardPodBuilder};
pub use sidecars::{is_pod_exceeding_node_resources, sidecars_ready, stop_sidecars, update_ready};
pub use status::make_task_run_status;
pub use termination::{parse_termination_message, TerminationMessageError};

use crate::constants::{SIDECAR_PREFIX, STEP_PREFIX};
use crate::crd::TaskRun;
use crate::resolve::ResolvedTaskResources;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PodBuildError {
    #[error("task must declare at least one step")]
    NoSteps,
    #[error("step {0:?} has no image")]
    MissingImage(String),
    #[error("workspace {0:?} is declared but not bound")]
    UnboundWorkspace(String),
    #[error("TaskRun has no uid, cannot set owner reference")]
    MissingUid,
}

/// Translates a resolved TaskRun into the pod that executes it
#[async_trait]
pub trait PodBuilder: Send + Sync {
    async fn build(&self, tr: &TaskRun, rtr: &ResolvedTaskResources) -> Result<Pod, PodBuildError>;
}

/// Step containers are recognised by their name prefix
pub fn is_container_step(name: &str) -> bool {
    name.starts_with(STEP_PREFIX)
}

pub fn is_container_sidecar(name: &str) -> bool {
    name.starts_with(SIDECAR_PREFIX)
}

/// Container name for the step at `index`
pub(crate) fn step_container_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("{STEP_PREFIX}unnamed-{index}")
    } else {
        format!("{STEP_PREFIX}{name}")
    }
}

pub(crate) fn sidecar_container_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("{SIDECAR_PREFIX}unnamed-{index}")
    } else {
        format!("{SIDECAR_PREFIX}{name}")
    }
}

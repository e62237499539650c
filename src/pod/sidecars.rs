//! # Sidecars
//!
//! Sidecar readiness gate and sidecar shutdown.
//!
//! Steps wait on the `tekton.dev/ready` annotation, which is only set once every
//! sidecar container is up. After the TaskRun finishes, still-running sidecars
//! are stopped by swapping their image for a no-op image, the only pod spec
//! mutation Kubernetes allows on a running container.

use super::is_container_step;
use crate::constants::{READY_ANNOTATION, READY_ANNOTATION_VALUE};
use crate::store::{PodClient, StoreError};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::ResourceExt;
use tracing::{debug, info};

/// True once the pod is running and every non-step container is either
/// running and ready, or terminated.
pub fn sidecars_ready(pod_status: &PodStatus) -> bool {
    if pod_status.phase.as_deref() != Some("Running") {
        return false;
    }
    pod_status
        .container_statuses
        .iter()
        .flatten()
        .filter(|c| !is_container_step(&c.name))
        .all(|c| {
            let state = c.state.as_ref();
            let running = state.and_then(|s| s.running.as_ref()).is_some();
            let terminated = state.and_then(|s| s.terminated.as_ref()).is_some();
            (running && c.ready) || terminated
        })
}

/// Set the readiness annotation on the live pod, if not already set
pub async fn update_ready(pods: &dyn PodClient, pod: &Pod) -> Result<(), StoreError> {
    let namespace = pod.namespace().unwrap_or_default();
    let mut live = pods.get(&namespace, &pod.name_any()).await?;

    if live.annotations().get(READY_ANNOTATION).map(String::as_str) == Some(READY_ANNOTATION_VALUE) {
        return Ok(());
    }
    live.annotations_mut().insert(
        READY_ANNOTATION.to_string(),
        READY_ANNOTATION_VALUE.to_string(),
    );
    pods.replace(&namespace, &live).await?;
    debug!(pod = pod.name_any().as_str(), "Marked pod ready");
    Ok(())
}

/// Swap every running non-step container of the live pod to `nop_image`.
///
/// A pod that no longer exists or is not running is left alone.
pub async fn stop_sidecars(pods: &dyn PodClient, nop_image: &str, pod: &Pod) -> Result<(), StoreError> {
    let namespace = pod.namespace().unwrap_or_default();
    let mut live = match pods.get(&namespace, &pod.name_any()).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    let status = live.status.clone().unwrap_or_default();
    if status.phase.as_deref() != Some("Running") {
        return Ok(());
    }

    let running_sidecars: Vec<String> = status
        .container_statuses
        .iter()
        .flatten()
        .filter(|c| !is_container_step(&c.name))
        .filter(|c| c.state.as_ref().and_then(|s| s.running.as_ref()).is_some())
        .map(|c| c.name.clone())
        .collect();

    let mut updated = false;
    if let Some(spec) = live.spec.as_mut() {
        for container in &mut spec.containers {
            if running_sidecars.contains(&container.name)
                && container.image.as_deref() != Some(nop_image)
            {
                container.image = Some(nop_image.to_string());
                updated = true;
            }
        }
    }

    if updated {
        pods.replace(&namespace, &live).await?;
        info!(
            pod = pod.name_any().as_str(),
            stopped = running_sidecars.len(),
            "🛑 Stopped running sidecars"
        );
    }
    Ok(())
}

/// Pod cannot be scheduled because no node has enough resources
pub fn is_pod_exceeding_node_resources(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| {
            c.reason.as_deref() == Some("Unschedulable")
                && c.message.as_deref().is_some_and(|m| m.contains("Insufficient"))
        })
}

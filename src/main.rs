//! # TaskRun Controller
//!
//! A Kubernetes controller that turns `TaskRun` resources into execution pods
//! and mirrors the pods' progress back into the TaskRun status.
//!
//! ## Overview
//!
//! For every TaskRun the controller:
//!
//! 1. **Resolves** the referenced Task or ClusterTask and the bound PipelineResources
//! 2. **Validates** params, resources and workspace bindings against the task
//! 3. **Creates** the pod that runs the task's steps
//! 4. **Tracks** the pod and reports step state, results and the Succeeded condition
//! 5. **Enforces** timeouts and cancellation, and stops sidecars once done
//! 6. **Notifies** cloud-event targets declared as output resources
//!
//! Prometheus metrics and health probes are served over HTTP.

use anyhow::Result;
use taskrun_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.task_runs,
        init.pods,
        init.reconciler,
        init.requeue,
        init.server_state,
        init.controller_config,
    )
    .await
}

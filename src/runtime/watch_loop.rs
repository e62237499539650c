//! # Watch Loop
//!
//! Controller watch loop that monitors TaskRun resources and their pods and
//! triggers reconciliation when changes are detected or timers fire.

use crate::config::ControllerConfig;
use crate::constants::TASK_RUN_LABEL_KEY;
use crate::controller::reconciler::{reconcile, Reconciler, TaskRunKey};
use crate::controller::server::ServerState;
use crate::controller::tracker::Tracker;
use crate::crd::TaskRun;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::runtime::requeue::TimerRequeue;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// TaskRuns to re-enqueue when `pod` changes.
///
/// The tracker is authoritative; the pod's `tekton.dev/taskRun` label covers
/// pods created before a controller restart emptied the tracker.
pub fn task_runs_for_pod(tracker: &Tracker, pod: &Pod) -> Vec<ObjectRef<TaskRun>> {
    let namespace = pod.namespace().unwrap_or_default();
    let mut keys = tracker.lookup(&namespace, &pod.name_any());
    if keys.is_empty() {
        if let Some(task_run) = pod.labels().get(TASK_RUN_LABEL_KEY) {
            keys.push(format!("{namespace}/{task_run}"));
        }
    }
    keys.iter()
        .filter_map(|key| TaskRunKey::parse(key).ok())
        .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
        .collect()
}

/// Run the controller watch loop
///
/// Sets up the Kubernetes controller to watch TaskRuns across all namespaces,
/// plus labelled pods and timer requeues. Handles graceful shutdown and
/// restarts the watch when the stream ends.
pub async fn run_watch_loop(
    task_runs: Api<TaskRun>,
    pods: Api<Pod>,
    reconciler: Arc<Reconciler>,
    requeue: Arc<TimerRequeue>,
    server_state: Arc<ServerState>,
    config: Arc<ControllerConfig>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    // Mark the server as not ready on SIGTERM/SIGINT so traffic drains first
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        let tracker = Arc::clone(&reconciler.tracker);
        let backoff = Arc::clone(&backoff_duration_ms);
        let filter_config = Arc::clone(&config);

        let controller_future = Controller::new(task_runs.clone(), watcher::Config::default().any_semantic())
            .watches(
                pods.clone(),
                watcher::Config::default().labels(TASK_RUN_LABEL_KEY),
                move |pod| task_runs_for_pod(&tracker, &pod),
            )
            .reconcile_on(requeue.subscribe())
            .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciliations))
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&filter_config);
                async move {
                    match &x {
                        Ok((object_ref, _)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(task_run = %object_ref, "watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));
        controller_future.instrument(watch_span).await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            config.watch_restart_delay_secs
        );
        tokio::time::sleep(config.watch_restart_delay_duration()).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn pod(labels: &[(&str, &str)]) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some("build-pod".to_string());
        pod.metadata.namespace = Some("ci".to_string());
        pod.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        pod
    }

    #[test]
    fn test_tracked_pod_maps_to_task_run() {
        let tracker = Tracker::new();
        tracker.track("ci", "build-pod", "ci/build").unwrap();

        let refs = task_runs_for_pod(&tracker, &pod(&[]));
        assert_eq!(refs, vec![ObjectRef::new("build").within("ci")]);
    }

    #[test]
    fn test_untracked_pod_falls_back_to_label() {
        let refs = task_runs_for_pod(&Tracker::new(), &pod(&[(TASK_RUN_LABEL_KEY, "build")]));
        assert_eq!(refs, vec![ObjectRef::new("build").within("ci")]);
        assert!(task_runs_for_pod(&Tracker::new(), &pod(&[])).is_empty());
    }
}

//! # Status Persistence
//!
//! Writes the outcome of a reconciliation pass back to the API server.
//!
//! The status subresource and the labels/annotations are written by two
//! independent patches, each skipped when the live object already matches.
//! Both are guarded by the live `resourceVersion`, so a concurrent writer
//! makes the patch fail with a conflict and the pass is retried.

use super::types::{ErrorList, Reconciler, ReconcilerError};
use crate::crd::TaskRun;
use crate::store::MetadataPatch;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Persist the status and metadata changes of `tr` relative to the live
    /// object. `original` is the object as fetched at the start of the pass.
    pub(crate) async fn persist(&self, original: &TaskRun, tr: &TaskRun) -> Result<(), ReconcilerError> {
        let namespace = tr.namespace().unwrap_or_default();
        let name = tr.name_any();

        let mut live = match self.task_runs.get(&namespace, &name).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                debug!("TaskRun {} was deleted before its status could be written", tr.key());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut errors = ErrorList::new();
        let mut written = false;

        if live.status != tr.status {
            let status = tr.status.clone().unwrap_or_default();
            match self
                .task_runs
                .patch_status(&namespace, &name, live.resource_version().as_deref(), &status)
                .await
            {
                Ok(updated) => {
                    debug!("Updated status of TaskRun {}", tr.key());
                    live = updated;
                    written = true;
                }
                Err(e) => {
                    warn!("Failed to update status of TaskRun {}: {}", tr.key(), e);
                    errors.push(e);
                }
            }
        }

        let patch = MetadataPatch {
            resource_version: live.resource_version(),
            labels: map_delta(original.labels(), live.labels(), tr.labels()),
            annotations: map_delta(original.annotations(), live.annotations(), tr.annotations()),
        };
        if !patch.is_empty() {
            match self.task_runs.patch_metadata(&namespace, &name, &patch).await {
                Ok(_) => {
                    debug!("Updated labels and annotations of TaskRun {}", tr.key());
                    written = true;
                }
                Err(e) => {
                    warn!("Failed to update labels and annotations of TaskRun {}: {}", tr.key(), e);
                    errors.push(e);
                }
            }
        }

        if written {
            self.refresh_running_gauge();
        }
        errors.into_result()
    }

    /// Recompute the running-TaskRuns gauge in the background
    fn refresh_running_gauge(&self) {
        let task_runs = Arc::clone(&self.task_runs);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match task_runs.list(None).await {
                Ok(list) => {
                    let running = metrics.running_task_runs(&list);
                    debug!(running = running, "Refreshed running TaskRuns gauge");
                }
                Err(e) => info!("Failed to list TaskRuns for metrics: {}", e),
            }
        });
    }
}

/// Changes needed to bring `live` in line with `desired`.
///
/// Keys present in `original` but dropped from `desired` are removed; keys
/// added to `live` by someone else since `original` was fetched are left alone.
fn map_delta(
    original: &BTreeMap<String, String>,
    live: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, Option<String>> {
    let mut delta: BTreeMap<String, Option<String>> = desired
        .iter()
        .filter(|(k, v)| live.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), Some(v.clone())))
        .collect();
    for key in original.keys() {
        if !desired.contains_key(key) && live.contains_key(key) {
            delta.insert(key.clone(), None);
        }
    }
    delta
}

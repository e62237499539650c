//! Terminal-state handling.
//!
//! A finished TaskRun first delivers its pending cloud events. Only once that
//! succeeds are its timers released and its still-running sidecars stopped;
//! until then the pod is kept as it is for inspection.

use super::types::{ErrorList, Reconciler, ReconcilerError};
use crate::cloudevent::send_cloud_events;
use crate::crd::TaskRun;
use crate::pod::stop_sidecars;
use chrono::Utc;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Reconciler {
    pub(crate) async fn finalize(&self, tr: &mut TaskRun) -> Result<(), ReconcilerError> {
        let key = tr.key();

        if let Err(e) = send_cloud_events(
            self.cloud_events.as_ref(),
            tr,
            self.config.cloud_event_max_attempts,
            Utc::now(),
        )
        .await
        {
            warn!("Failed to send cloud events for TaskRun {}: {}", key, e);
            return Err(e.into());
        }

        if self.timeouts.release(&key) {
            debug!("Released timers for finished TaskRun {}", key);
        }

        let mut errors = ErrorList::new();
        if let Some(pod_name) = tr.pod_name() {
            let namespace = tr.namespace().unwrap_or_default();
            match self.pods.get(&namespace, pod_name).await {
                Ok(pod) => {
                    errors.check(stop_sidecars(self.pods.as_ref(), &self.config.nop_image, &pod).await);

                    let metrics = Arc::clone(&self.metrics);
                    let snapshot = tr.clone();
                    tokio::spawn(async move {
                        if let Err(e) = metrics.record_pod_latency(&pod, &snapshot) {
                            warn!("Failed to record pod latency for TaskRun {}: {}", snapshot.key(), e);
                        }
                    });
                }
                Err(e) if e.is_not_found() => {
                    debug!("Pod {} of TaskRun {} no longer exists", pod_name, key);
                }
                Err(e) => {
                    warn!("Failed to get pod {} of TaskRun {}: {}", pod_name, key, e);
                    errors.push(e);
                }
            }
        }

        let metrics = Arc::clone(&self.metrics);
        let snapshot = tr.clone();
        tokio::spawn(async move {
            match metrics.duration_and_count(&snapshot) {
                Ok(true) => info!("📊 Recorded duration of TaskRun {}", snapshot.key()),
                Ok(false) => {}
                Err(e) => warn!("Failed to record duration of TaskRun {}: {}", snapshot.key(), e),
            }
        });

        errors.into_result()
    }
}

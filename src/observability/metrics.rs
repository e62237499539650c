//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `taskrun_controller_reconciliations_total` - Total number of reconciliations
//! - `taskrun_controller_reconciliation_errors_total` - Total number of reconciliation errors
//! - `taskrun_controller_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `taskrun_controller_requeues_total` - Requeues by trigger (`error-backoff`, `timer`)
//! - `taskrun_duration_seconds` - Wall time of finished TaskRuns by task, namespace and status
//! - `taskrun_count` - Finished TaskRuns by status
//! - `running_taskruns_count` - TaskRuns not yet done
//! - `taskrun_pod_latency_seconds` - Delay between pod creation and scheduling

use crate::crd::{ConditionReason, TaskRun};
use anyhow::Result;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use thiserror::Error;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "taskrun_controller_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "taskrun_controller_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "taskrun_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "taskrun_controller_requeues_total",
            "Total number of requeues by trigger",
        ),
        &["trigger"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static TASKRUN_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "taskrun_duration_seconds",
            "Execution time of finished TaskRuns in seconds",
        )
        .buckets(vec![10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 5400.0, 10800.0]),
        &["task", "namespace", "status"],
    )
    .expect("Failed to create TASKRUN_DURATION metric - this should never happen")
});

static TASKRUN_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("taskrun_count", "Number of finished TaskRuns by status"),
        &["status"],
    )
    .expect("Failed to create TASKRUN_COUNT metric - this should never happen")
});

static RUNNING_TASKRUNS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("running_taskruns_count", "Number of TaskRuns executing currently")
        .expect("Failed to create RUNNING_TASKRUNS metric - this should never happen")
});

static POD_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "taskrun_pod_latency_seconds",
            "Time between pod creation and pod scheduling in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["task", "namespace"],
    )
    .expect("Failed to create POD_LATENCY metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
///
/// Returns an error if any metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKRUN_DURATION.clone()))?;
    REGISTRY.register(Box::new(TASKRUN_COUNT.clone()))?;
    REGISTRY.register(Box::new(RUNNING_TASKRUNS.clone()))?;
    REGISTRY.register(Box::new(POD_LATENCY.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(trigger: &str) {
    REQUEUES_TOTAL.with_label_values(&[trigger]).inc();
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("TaskRun {0} has no start time")]
    MissingStartTime(String),
    #[error("TaskRun {0} is not done")]
    NotDone(String),
    #[error("pod {0} has no creation timestamp")]
    MissingCreationTime(String),
}

/// Status label of a finished TaskRun
fn status_label(tr: &TaskRun) -> &'static str {
    let cancelled = tr
        .status
        .as_ref()
        .and_then(|s| s.succeeded_condition())
        .is_some_and(|c| c.reason == ConditionReason::Cancelled.as_str());
    if cancelled {
        "cancelled"
    } else if tr.is_successful() {
        "success"
    } else {
        "failed"
    }
}

/// Records TaskRun-level metrics.
///
/// Duration and count are recorded at most once per TaskRun key for the
/// lifetime of the process, however many times the finished TaskRun is
/// reconciled.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    recorded: Mutex<HashSet<String>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether duration and count were already recorded for `key`
    pub fn is_recorded(&self, key: &str) -> bool {
        self.recorded
            .lock()
            .map(|recorded| recorded.contains(key))
            .unwrap_or(false)
    }

    /// Forget `key` once its TaskRun is deleted
    pub fn forget(&self, key: &str) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.remove(key);
        }
    }

    /// Record duration and count of a finished TaskRun.
    ///
    /// Returns `Ok(false)` when it was already recorded.
    pub fn duration_and_count(&self, tr: &TaskRun) -> Result<bool, MetricsError> {
        if !tr.is_done() {
            return Err(MetricsError::NotDone(tr.key()));
        }
        let start = tr
            .start_time()
            .ok_or_else(|| MetricsError::MissingStartTime(tr.key()))?;
        let end = tr
            .status
            .as_ref()
            .and_then(|s| s.completion_time)
            .unwrap_or_else(chrono::Utc::now);

        {
            let Ok(mut recorded) = self.recorded.lock() else {
                return Ok(false);
            };
            if !recorded.insert(tr.key()) {
                return Ok(false);
            }
        }

        let status = status_label(tr);
        let task = tr.task_name().map_or_else(|| "anonymous".to_string(), str::to_string);
        let namespace = tr.namespace().unwrap_or_default();
        let seconds = (end - start).to_std().unwrap_or_default().as_secs_f64();
        TASKRUN_DURATION
            .with_label_values(&[task.as_str(), namespace.as_str(), status])
            .observe(seconds);
        TASKRUN_COUNT.with_label_values(&[status]).inc();
        Ok(true)
    }

    /// Record the delay between pod creation and its `PodScheduled` transition.
    ///
    /// Pods not scheduled yet record nothing.
    pub fn record_pod_latency(&self, pod: &Pod, tr: &TaskRun) -> Result<(), MetricsError> {
        let created = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .and_then(crate::crd::time_to_chrono)
            .ok_or_else(|| MetricsError::MissingCreationTime(pod.name_any()))?;
        let scheduled = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| {
                conditions
                    .iter()
                    .find(|c| c.type_ == "PodScheduled" && c.status == "True")
            })
            .and_then(|c| c.last_transition_time.as_ref())
            .and_then(crate::crd::time_to_chrono);
        let Some(scheduled) = scheduled else {
            return Ok(());
        };

        let task = tr.task_name().map_or_else(|| "anonymous".to_string(), str::to_string);
        let namespace = tr.namespace().unwrap_or_default();
        let seconds = (scheduled - created).to_std().unwrap_or_default().as_secs_f64();
        POD_LATENCY
            .with_label_values(&[task.as_str(), namespace.as_str()])
            .observe(seconds);
        Ok(())
    }

    /// Set the running gauge from a full TaskRun listing
    pub fn running_task_runs(&self, task_runs: &[TaskRun]) -> i64 {
        let running = task_runs.iter().filter(|tr| !tr.is_done()).count();
        let running = i64::try_from(running).unwrap_or(i64::MAX);
        RUNNING_TASKRUNS.set(running);
        running
    }
}

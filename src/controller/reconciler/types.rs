//! # Types
//!
//! Core types for the reconciler.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::events::{EventSink, KubeEventSink};
use crate::controller::timeout::{TimeoutSet, TimerCallback};
use crate::controller::tracker::{Tracker, TrackerError};
use crate::cloudevent::{CloudEventClient, CloudEventError, HttpCloudEventClient};
use crate::config::ControllerConfig;
use crate::observability::metrics::MetricsRecorder;
use crate::pod::{PodBuilder, StandardPodBuilder, TerminationMessageError};
use crate::store::api::{KubePipelineResourceClient, KubePodClient, KubeTaskClient, KubeTaskRunClient};
use crate::store::{PipelineResourceClient, PodClient, StoreError, TaskClient, TaskRunClient};
use kube::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to send cloud events: {0}")]
    CloudEvent(#[from] CloudEventError),

    #[error("failed to track pod: {0}")]
    Tracker(#[from] TrackerError),

    #[error("parsing message for container status {index}: {source}")]
    ResultMessage {
        index: usize,
        #[source]
        source: TerminationMessageError,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ReconcilerError>),
}

fn join_errors(errors: &[ReconcilerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates independent failures into a single [`ReconcilerError`]
#[derive(Debug, Default)]
pub struct ErrorList(Vec<ReconcilerError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<ReconcilerError>) {
        match error.into() {
            ReconcilerError::Multiple(errors) => self.0.extend(errors),
            error => self.0.push(error),
        }
    }

    /// Push the error of `result`, if any
    pub fn check<E: Into<ReconcilerError>>(&mut self, result: Result<(), E>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok` when empty, the lone error, or [`ReconcilerError::Multiple`]
    pub fn into_result(mut self) -> Result<(), ReconcilerError> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(ReconcilerError::Multiple(self.0)),
        }
    }
}

/// Reconciliation key, `namespace/name` or bare `name` (namespace `default`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRunKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource key: {0:?}")]
pub struct InvalidKey(pub String);

impl TaskRunKey {
    pub fn parse(key: &str) -> Result<Self, InvalidKey> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("default", name),
            (Some(namespace), Some(name), None) if !namespace.is_empty() => (namespace, name),
            _ => return Err(InvalidKey(key.to_string())),
        };
        if name.is_empty() {
            return Err(InvalidKey(key.to_string()));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for TaskRunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(
                config.backoff_start_duration(),
                config.backoff_max_duration(),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles TaskRuns against their pods.
///
/// Every collaborator is injected, so the same reconciler runs against the
/// Kubernetes API in production and in-memory fakes in tests.
#[derive(Clone)]
pub struct Reconciler {
    pub task_runs: Arc<dyn TaskRunClient>,
    pub pods: Arc<dyn PodClient>,
    pub tasks: Arc<dyn TaskClient>,
    pub resources: Arc<dyn PipelineResourceClient>,
    pub pod_builder: Arc<dyn PodBuilder>,
    pub cloud_events: Arc<dyn CloudEventClient>,
    pub events: Arc<dyn EventSink>,
    pub timeouts: Arc<TimeoutSet>,
    pub tracker: Arc<Tracker>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<ControllerConfig>,
    // Backoff state per resource (identified by namespace/name)
    // Owned by error_policy() so failing resources never block the watch path
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("timeouts", &self.timeouts)
            .field("tracker", &self.tracker)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Timeout of a single cloud event delivery
const CLOUD_EVENT_TIMEOUT: Duration = Duration::from_secs(10);

impl Reconciler {
    /// Reconciler talking to the Kubernetes API through `client`.
    ///
    /// `timer_callback` is invoked with the TaskRun key whenever a timeout or
    /// quota backoff timer fires.
    pub fn new(
        client: Client,
        config: Arc<ControllerConfig>,
        timer_callback: TimerCallback,
    ) -> Result<Self, CloudEventError> {
        Ok(Self {
            task_runs: Arc::new(KubeTaskRunClient::new(client.clone(), config.controller_name.clone())),
            pods: Arc::new(KubePodClient::new(client.clone())),
            tasks: Arc::new(KubeTaskClient::new(client.clone())),
            resources: Arc::new(KubePipelineResourceClient::new(client.clone())),
            pod_builder: Arc::new(StandardPodBuilder::from_config(&config)),
            cloud_events: Arc::new(HttpCloudEventClient::new(CLOUD_EVENT_TIMEOUT)?),
            events: Arc::new(KubeEventSink::new(client, &config.controller_name)),
            timeouts: Arc::new(TimeoutSet::from_config(timer_callback, &config)),
            tracker: Arc::new(Tracker::new()),
            metrics: Arc::new(MetricsRecorder::new()),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

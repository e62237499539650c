//! Common test utilities for reconciler integration tests
//!
//! In-memory fakes of every collaborator the reconciler is built on. Each fake
//! counts the writes it receives and can be told to fail, so tests can assert
//! on side effects without a cluster.

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskrun_controller::cloudevent::{CloudEvent, CloudEventClient, CloudEventError};
use taskrun_controller::config::ControllerConfig;
use taskrun_controller::controller::events::{EventSink, TaskRunEvent};
use taskrun_controller::controller::timeout::{TimeoutSet, TimerCallback};
use taskrun_controller::controller::tracker::Tracker;
use taskrun_controller::crd::{
    chrono_to_time, ClusterTask, PipelineResource, Step, Task, TaskRef, TaskRun, TaskRunSpec,
    TaskRunStatus, TaskSpec,
};
use taskrun_controller::observability::metrics::MetricsRecorder;
use taskrun_controller::pod::StandardPodBuilder;
use taskrun_controller::prelude::Reconciler;
use taskrun_controller::store::{
    MetadataPatch, PipelineResourceClient, PodClient, StoreError, TaskClient, TaskRunClient,
};

pub const NAMESPACE: &str = "default";

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[derive(Debug, Default)]
pub struct FakeTaskRuns {
    pub items: Mutex<HashMap<String, TaskRun>>,
    pub status_writes: AtomicUsize,
    pub metadata_writes: AtomicUsize,
    pub status_attempts: AtomicUsize,
    pub metadata_attempts: AtomicUsize,
    pub fail_get: AtomicBool,
    pub fail_status_patch: AtomicBool,
    pub fail_metadata_patch: AtomicBool,
    version: AtomicUsize,
}

impl FakeTaskRuns {
    pub fn insert(&self, mut tr: TaskRun) {
        tr.metadata.resource_version = Some(self.next_version());
        let k = key(&tr.namespace().unwrap_or_default(), &tr.name_any());
        self.items.lock().unwrap().insert(k, tr);
    }

    pub fn stored(&self, name: &str) -> TaskRun {
        self.items.lock().unwrap()[&key(NAMESPACE, name)].clone()
    }

    pub fn writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst) + self.metadata_writes.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl TaskRunClient for FakeTaskRuns {
    async fn get(&self, namespace: &str, name: &str) -> Result<TaskRun, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Other("injected get failure".to_string()));
        }
        self.items
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found("TaskRun", name))
    }

    async fn list(&self, _namespace: Option<&str>) -> Result<Vec<TaskRun>, StoreError> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &TaskRunStatus,
    ) -> Result<TaskRun, StoreError> {
        self.status_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_status_patch.load(Ordering::SeqCst) {
            return Err(StoreError::Other("injected status patch failure".to_string()));
        }
        let version = self.next_version();
        let mut items = self.items.lock().unwrap();
        let tr = items
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::not_found("TaskRun", name))?;
        if resource_version.is_some() && resource_version != tr.metadata.resource_version.as_deref() {
            return Err(StoreError::Conflict(format!("TaskRun {name} was modified")));
        }
        tr.status = Some(status.clone());
        tr.metadata.resource_version = Some(version);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(tr.clone())
    }

    async fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: &MetadataPatch,
    ) -> Result<TaskRun, StoreError> {
        self.metadata_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata_patch.load(Ordering::SeqCst) {
            return Err(StoreError::Other("injected metadata patch failure".to_string()));
        }
        let version = self.next_version();
        let mut items = self.items.lock().unwrap();
        let tr = items
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::not_found("TaskRun", name))?;
        if patch.resource_version.is_some()
            && patch.resource_version != tr.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!("TaskRun {name} was modified")));
        }
        apply(tr.labels_mut(), &patch.labels);
        apply(tr.annotations_mut(), &patch.annotations);
        tr.metadata.resource_version = Some(version);
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(tr.clone())
    }
}

fn apply(target: &mut BTreeMap<String, String>, delta: &BTreeMap<String, Option<String>>) {
    for (k, v) in delta {
        match v {
            Some(v) => {
                target.insert(k.clone(), v.clone());
            }
            None => {
                target.remove(k);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct FakePods {
    pub items: Mutex<HashMap<String, Pod>>,
    pub created: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub replaced: AtomicUsize,
    /// Number of upcoming creations rejected for exceeding a quota
    pub quota_failures: AtomicUsize,
}

impl FakePods {
    pub fn insert(&self, pod: Pod) {
        let k = key(&pod.namespace().unwrap_or_default(), &pod.name_any());
        self.items.lock().unwrap().insert(k, pod);
    }

    pub fn get_stored(&self, name: &str) -> Option<Pod> {
        self.items.lock().unwrap().get(&key(NAMESPACE, name)).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Give the stored pod `status`
    pub fn set_status(&self, name: &str, status: PodStatus) {
        if let Some(pod) = self.items.lock().unwrap().get_mut(&key(NAMESPACE, name)) {
            pod.status = Some(status);
        }
    }
}

#[async_trait]
impl PodClient for FakePods {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.items
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found("Pod", name))
    }

    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let remaining = self.quota_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.quota_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Forbidden(format!(
                "pods {:?} is forbidden: exceeded quota: compute-resources",
                pod.name_any()
            )));
        }
        let mut pod = pod.clone();
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.creation_timestamp = chrono_to_time(Utc::now());
        let k = key(namespace, &pod.name_any());
        let mut items = self.items.lock().unwrap();
        if items.contains_key(&k) {
            return Err(StoreError::Conflict(format!("pod {k} already exists")));
        }
        items.insert(k, pod.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(pod)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let removed = self.items.lock().unwrap().remove(&key(namespace, name));
        match removed {
            Some(_) => {
                self.deleted.lock().unwrap().push(name.to_string());
                Ok(())
            }
            None => Err(StoreError::not_found("Pod", name)),
        }
    }

    async fn replace(&self, namespace: &str, pod: &Pod) -> Result<Pod, StoreError> {
        let k = key(namespace, &pod.name_any());
        let mut items = self.items.lock().unwrap();
        if !items.contains_key(&k) {
            return Err(StoreError::not_found("Pod", pod.name_any()));
        }
        items.insert(k, pod.clone());
        self.replaced.fetch_add(1, Ordering::SeqCst);
        Ok(pod.clone())
    }
}

#[derive(Debug, Default)]
pub struct FakeTasks {
    pub tasks: Mutex<HashMap<String, Task>>,
    pub cluster_tasks: Mutex<HashMap<String, ClusterTask>>,
    pub lookups: AtomicUsize,
}

impl FakeTasks {
    pub fn insert(&self, task: Task) {
        let k = key(&task.namespace().unwrap_or_default(), &task.name_any());
        self.tasks.lock().unwrap().insert(k, task);
    }
}

#[async_trait]
impl TaskClient for FakeTasks {
    async fn get_task(&self, namespace: &str, name: &str) -> Result<Task, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found("Task", name))
    }

    async fn get_cluster_task(&self, name: &str) -> Result<ClusterTask, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.cluster_tasks
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ClusterTask", name))
    }
}

#[derive(Debug, Default)]
pub struct FakeResources {
    pub items: Mutex<HashMap<String, PipelineResource>>,
}

impl FakeResources {
    pub fn insert(&self, resource: PipelineResource) {
        let k = key(&resource.namespace().unwrap_or_default(), &resource.name_any());
        self.items.lock().unwrap().insert(k, resource);
    }
}

#[async_trait]
impl PipelineResourceClient for FakeResources {
    async fn get(&self, namespace: &str, name: &str) -> Result<PipelineResource, StoreError> {
        self.items
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found("PipelineResource", name))
    }
}

#[derive(Debug, Default)]
pub struct FakeCloudEvents {
    pub fail: AtomicBool,
    pub delivered: Mutex<Vec<String>>,
    pub attempts: AtomicUsize,
}

#[async_trait]
impl CloudEventClient for FakeCloudEvents {
    async fn send(&self, target: &str, _event: &CloudEvent) -> Result<(), CloudEventError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CloudEventError::Delivery(format!("{target} is unreachable")));
        }
        self.delivered.lock().unwrap().push(target.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<TaskRunEvent>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, _task_run: &TaskRun, event: TaskRunEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A reconciler wired to fakes, with handles on every fake
pub struct Harness {
    pub reconciler: Reconciler,
    pub task_runs: Arc<FakeTaskRuns>,
    pub pods: Arc<FakePods>,
    pub tasks: Arc<FakeTasks>,
    pub resources: Arc<FakeResources>,
    pub cloud_events: Arc<FakeCloudEvents>,
    pub events: Arc<RecordingEvents>,
    pub fired: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        let task_runs = Arc::new(FakeTaskRuns::default());
        let pods = Arc::new(FakePods::default());
        let tasks = Arc::new(FakeTasks::default());
        let resources = Arc::new(FakeResources::default());
        let cloud_events = Arc::new(FakeCloudEvents::default());
        let events = Arc::new(RecordingEvents::default());
        let fired = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&fired);
        let callback: TimerCallback = Arc::new(move |key: &str| {
            sink.lock().unwrap().push(key.to_string());
        });
        let config = Arc::new(ControllerConfig {
            quota_backoff_jitter: false,
            ..ControllerConfig::default()
        });

        let reconciler = Reconciler {
            task_runs: Arc::clone(&task_runs) as Arc<dyn TaskRunClient>,
            pods: Arc::clone(&pods) as Arc<dyn PodClient>,
            tasks: Arc::clone(&tasks) as Arc<dyn TaskClient>,
            resources: Arc::clone(&resources) as Arc<dyn PipelineResourceClient>,
            pod_builder: Arc::new(StandardPodBuilder::from_config(&config)),
            cloud_events: Arc::clone(&cloud_events) as Arc<dyn CloudEventClient>,
            events: Arc::clone(&events) as Arc<dyn EventSink>,
            timeouts: Arc::new(TimeoutSet::from_config(callback, &config)),
            tracker: Arc::new(Tracker::new()),
            metrics: Arc::new(MetricsRecorder::new()),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        };

        let harness = Self {
            reconciler,
            task_runs,
            pods,
            tasks,
            resources,
            cloud_events,
            events,
            fired,
        };
        harness.tasks.insert(build_task());
        harness
    }

    pub async fn reconcile(&self, name: &str) -> Result<(), taskrun_controller::prelude::ReconcilerError> {
        self.reconciler.reconcile(&key(NAMESPACE, name)).await
    }

    pub fn timer_armed(&self, name: &str) -> bool {
        self.reconciler.timeouts.is_armed(&key(NAMESPACE, name))
    }
}

/// Task `build` with a single `compile` step
pub fn build_task() -> Task {
    let mut task = Task::new(
        "build",
        TaskSpec {
            steps: vec![Step {
                name: "compile".to_string(),
                image: "rust:1".to_string(),
                command: vec!["cargo".to_string()],
                args: vec!["build".to_string()],
                ..Step::default()
            }],
            ..TaskSpec::default()
        },
    );
    task.metadata.namespace = Some(NAMESPACE.to_string());
    task.metadata.labels = Some(BTreeMap::from([("team".to_string(), "ci".to_string())]));
    task
}

/// TaskRun referencing the `build` task, created `age` ago
pub fn task_run(name: &str, age: Duration) -> TaskRun {
    let mut tr = TaskRun::new(
        name,
        TaskRunSpec {
            task_ref: Some(TaskRef {
                name: "build".to_string(),
                ..TaskRef::default()
            }),
            ..TaskRunSpec::default()
        },
    );
    tr.metadata.namespace = Some(NAMESPACE.to_string());
    tr.metadata.uid = Some(format!("uid-{name}"));
    let created = Utc::now() - chrono::Duration::from_std(age).unwrap();
    tr.metadata.creation_timestamp = chrono_to_time(created);
    tr
}

pub fn running_container(name: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        ready: true,
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..ContainerState::default()
        }),
        ..ContainerStatus::default()
    }
}

pub fn terminated_container(name: &str, exit_code: i32, message: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                message: Some(message.to_string()),
                ..ContainerStateTerminated::default()
            }),
            ..ContainerState::default()
        }),
        ..ContainerStatus::default()
    }
}

pub fn pod_status(phase: &str, containers: Vec<ContainerStatus>) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        container_statuses: Some(containers),
        ..PodStatus::default()
    }
}

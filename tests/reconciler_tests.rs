//! Reconciler integration tests
//!
//! Drive full reconciliation passes against the in-memory fakes in `common`.

mod common;

use chrono::Utc;
use common::*;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use taskrun_controller::constants::{TASK_LABEL_KEY, TASK_RUN_LABEL_KEY};
use taskrun_controller::crd::{
    CloudEventCondition, CloudEventDelivery, Condition, ConditionReason, ConditionStatus,
    TaskRun, TaskRunSpecStatus, TaskRunStatus, WorkspaceDeclaration,
};
use taskrun_controller::pod::pod_name_for;
use taskrun_controller::prelude::{BackoffState, ReconcilerError};

const MINUTE: Duration = Duration::from_secs(60);

fn succeeded(tr: &TaskRun) -> Condition {
    tr.status
        .as_ref()
        .and_then(TaskRunStatus::succeeded_condition)
        .cloned()
        .expect("TaskRun has a Succeeded condition")
}

/// Give `tr` a started status pointing at its pod
fn started(mut tr: TaskRun, condition: Condition) -> TaskRun {
    let start = tr.creation_time().unwrap();
    let pod_name = pod_name_for(&tr.metadata.name.clone().unwrap());
    let status = tr.status_mut();
    status.start_time = Some(start);
    status.pod_name = pod_name;
    status.conditions.push(Condition {
        last_transition_time: Some(start),
        ..condition
    });
    tr
}

/// A running pod for `tr` with one step and one sidecar container
fn pod_for(tr: &TaskRun) -> Pod {
    let name = tr.metadata.name.clone().unwrap();
    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name_for(&name)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(TASK_RUN_LABEL_KEY.to_string(), name)])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![
                Container {
                    name: "step-compile".to_string(),
                    image: Some("rust:1".to_string()),
                    ..Container::default()
                },
                Container {
                    name: "sidecar-proxy".to_string(),
                    image: Some("envoy:1".to_string()),
                    ..Container::default()
                },
            ],
            ..PodSpec::default()
        }),
        status: Some(pod_status(
            "Running",
            vec![
                terminated_container("step-compile", 0, ""),
                running_container("sidecar-proxy"),
            ],
        )),
    }
}

#[tokio::test]
async fn test_new_task_run_creates_pod_and_reports_running() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));

    h.reconcile("build-1").await.unwrap();

    assert_eq!(h.pods.created(), 1);
    let pod = h.pods.get_stored("build-1-pod").expect("pod was created");
    assert_eq!(
        pod.metadata.labels.unwrap().get(TASK_RUN_LABEL_KEY).map(String::as_str),
        Some("build-1")
    );

    let stored = h.task_runs.stored("build-1");
    let condition = succeeded(&stored);
    assert_eq!(condition.status, ConditionStatus::Unknown);
    assert_eq!(condition.reason, ConditionReason::Running.as_str());
    assert_eq!(stored.pod_name(), Some("build-1-pod"));
    assert!(stored.start_time().unwrap() >= stored.creation_time().unwrap());
    assert!(h.timer_armed("build-1"), "timeout timer is armed on creation");
    assert_eq!(h.events.reasons(), vec!["Started".to_string()]);
}

#[tokio::test]
async fn test_task_labels_propagate_to_task_run() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));

    h.reconcile("build-1").await.unwrap();

    let stored = h.task_runs.stored("build-1");
    let labels = stored.metadata.labels.unwrap();
    assert_eq!(labels.get("team").map(String::as_str), Some("ci"));
    assert_eq!(labels.get(TASK_LABEL_KEY).map(String::as_str), Some("build"));
}

#[tokio::test]
async fn test_second_pass_without_changes_writes_nothing() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));

    h.reconcile("build-1").await.unwrap();
    let writes = h.task_runs.writes();
    assert!(writes > 0);

    h.reconcile("build-1").await.unwrap();
    assert_eq!(h.task_runs.writes(), writes, "consistent status is not rewritten");
    assert_eq!(h.pods.created(), 1, "existing pod is reused");
    assert_eq!(h.events.reasons().len(), 1, "no transition, no event");
}

#[tokio::test]
async fn test_missing_task_run_is_ignored() {
    let h = Harness::new();

    h.reconcile("gone").await.unwrap();
    h.reconcile("default/gone").await.unwrap();

    assert_eq!(h.pods.created(), 0);
    assert_eq!(h.task_runs.writes(), 0);
}

#[tokio::test]
async fn test_malformed_key_is_not_retried() {
    let h = Harness::new();
    assert!(h.reconcile("a/b/c").await.is_ok());
    assert!(h.reconciler.reconcile("").await.is_ok());
}

#[tokio::test]
async fn test_get_failure_is_returned() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.task_runs.fail_get.store(true, Ordering::SeqCst);

    assert!(h.reconcile("build-1").await.is_err());
    assert_eq!(h.pods.created(), 0);
}

#[tokio::test]
async fn test_done_task_run_creates_no_pod_and_releases_timers_once() {
    let h = Harness::new();
    let tr = started(
        task_run("build-1", 10 * MINUTE),
        Condition::succeeded(ConditionStatus::True, ConditionReason::Succeeded, "done"),
    );
    h.task_runs.insert(tr);
    h.reconciler
        .timeouts
        .set_task_run_timer("default/build-1", Duration::from_secs(3600));
    assert!(h.timer_armed("build-1"));

    h.reconcile("build-1").await.unwrap();
    assert!(!h.timer_armed("build-1"));
    assert!(!h.reconciler.timeouts.release("default/build-1"), "already released");

    h.reconcile("build-1").await.unwrap();
    assert_eq!(h.pods.created(), 0);
    assert_eq!(h.tasks.lookups.load(Ordering::SeqCst), 0, "done runs are not resolved");
    assert_eq!(h.task_runs.writes(), 0);
}

#[tokio::test]
async fn test_timed_out_task_run_deletes_pod_and_fails() {
    let h = Harness::new();
    let mut tr = started(
        task_run("build-1", 10 * MINUTE),
        Condition::succeeded(ConditionStatus::Unknown, ConditionReason::Running, "running"),
    );
    tr.spec.timeout = Some("1s".to_string());
    let start = tr.start_time().unwrap();
    h.pods.insert(pod_for(&tr));
    h.task_runs.insert(tr);

    h.reconcile("build-1").await.unwrap();

    assert_eq!(*h.pods.deleted.lock().unwrap(), vec!["build-1-pod".to_string()]);
    let stored = h.task_runs.stored("build-1");
    let condition = succeeded(&stored);
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, ConditionReason::Timeout.as_str());
    assert!(condition.message.contains("failed to finish within"), "{}", condition.message);
    let completion = stored.status.unwrap().completion_time.unwrap();
    assert!(completion >= start + chrono::Duration::seconds(1));
    assert_eq!(h.pods.created(), 0);
    assert!(h.events.reasons().contains(&"Failed".to_string()));
}

#[tokio::test]
async fn test_cancelled_task_run_deletes_pod() {
    let h = Harness::new();
    let mut tr = started(
        task_run("build-1", MINUTE),
        Condition::succeeded(ConditionStatus::Unknown, ConditionReason::Running, "running"),
    );
    tr.spec.status = Some(TaskRunSpecStatus::Cancelled);
    h.pods.insert(pod_for(&tr));
    h.task_runs.insert(tr);

    h.reconcile("build-1").await.unwrap();

    assert!(h.pods.get_stored("build-1-pod").is_none());
    assert_eq!(h.pods.created(), 0);
    assert_eq!(h.tasks.lookups.load(Ordering::SeqCst), 0, "cancelled runs are not resolved");
    let stored = h.task_runs.stored("build-1");
    let condition = succeeded(&stored);
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, ConditionReason::Cancelled.as_str());
    assert_eq!(condition.message, "TaskRun \"build-1\" was cancelled");
    assert!(stored.status.unwrap().completion_time.is_some());
}

#[tokio::test]
async fn test_cancelling_without_pod_still_fails_task_run() {
    let h = Harness::new();
    let mut tr = task_run("build-1", MINUTE);
    tr.spec.status = Some(TaskRunSpecStatus::Cancelled);
    h.task_runs.insert(tr);

    h.reconcile("build-1").await.unwrap();

    assert_eq!(h.pods.created(), 0);
    assert!(h.task_runs.stored("build-1").is_done());
}

#[tokio::test]
async fn test_missing_task_fails_resolution() {
    let h = Harness::new();
    let mut tr = task_run("build-1", MINUTE);
    tr.spec.task_ref.as_mut().unwrap().name = "missing".to_string();
    h.task_runs.insert(tr);

    h.reconcile("build-1").await.unwrap();

    let condition = succeeded(&h.task_runs.stored("build-1"));
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, ConditionReason::ResolutionFailed.as_str());
    assert_eq!(h.pods.created(), 0);
}

#[tokio::test]
async fn test_unbound_workspace_fails_validation() {
    let h = Harness::new();
    let mut task = build_task();
    task.spec.workspaces.push(WorkspaceDeclaration {
        name: "source".to_string(),
        ..WorkspaceDeclaration::default()
    });
    h.tasks.insert(task);
    h.task_runs.insert(task_run("build-1", MINUTE));

    h.reconcile("build-1").await.unwrap();

    let condition = succeeded(&h.task_runs.stored("build-1"));
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, ConditionReason::ValidationFailed.as_str());
    assert!(condition.message.contains("source"), "{}", condition.message);
    assert_eq!(h.pods.created(), 0);
}

#[tokio::test]
async fn test_invalid_timeout_fails_validation() {
    let h = Harness::new();
    let mut tr = task_run("build-1", MINUTE);
    tr.spec.timeout = Some("soon".to_string());
    h.task_runs.insert(tr);

    h.reconcile("build-1").await.unwrap();

    let condition = succeeded(&h.task_runs.stored("build-1"));
    assert_eq!(condition.reason, ConditionReason::ValidationFailed.as_str());
    assert!(condition.message.starts_with("invalid timeout"));
}

#[tokio::test]
async fn test_quota_failure_backs_off_then_recovers() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.pods.quota_failures.store(2, Ordering::SeqCst);

    h.reconcile("build-1").await.unwrap();
    let condition = succeeded(&h.task_runs.stored("build-1"));
    assert_eq!(condition.status, ConditionStatus::Unknown);
    assert_eq!(condition.reason, ConditionReason::ExceededResourceQuota.as_str());
    assert!(
        condition.message.starts_with("TaskRun Pod exceeded available resources, reattempted 1 times"),
        "{}",
        condition.message
    );
    assert!(h.events.reasons().contains(&"BuildCreationFailed".to_string()));
    let first = h.reconciler.timeouts.backoff("default/build-1").unwrap();
    assert_eq!(first.attempts, 1);
    assert!(h.timer_armed("build-1"), "retry timer armed");

    // Still inside the backoff window: the attempt count holds
    h.reconcile("build-1").await.unwrap();
    assert_eq!(h.reconciler.timeouts.backoff("default/build-1").unwrap(), first);
    assert_eq!(h.pods.created(), 0);

    h.reconcile("build-1").await.unwrap();
    assert_eq!(h.pods.created(), 1);
    assert!(h.reconciler.timeouts.backoff("default/build-1").is_none());
}

#[test]
fn test_repeated_quota_failures_grow_backoff_horizon() {
    let h = Harness::new();
    let start = Utc::now();
    let timeout = Duration::from_secs(3600);
    let mut now = start;
    let mut horizons = Vec::new();

    for _ in 0..3 {
        let (record, backing_off) =
            h.reconciler.timeouts.get_backoff_at("default/build-1", start, timeout, now);
        assert!(!backing_off);
        horizons.push(record.next_attempt);
        now = record.next_attempt;
    }

    let record = h.reconciler.timeouts.backoff("default/build-1").unwrap();
    assert_eq!(record.attempts, 3);
    assert!(horizons.windows(2).all(|w| w[0] < w[1]), "{horizons:?}");
    assert!(horizons[2] - horizons[1] > horizons[1] - horizons[0]);
}

#[tokio::test]
async fn test_completed_pod_marks_success_and_finalizes() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.reconcile("build-1").await.unwrap();
    assert!(h.timer_armed("build-1"));

    h.pods.set_status(
        "build-1-pod",
        pod_status("Succeeded", vec![terminated_container("step-compile", 0, "")]),
    );
    h.reconcile("build-1").await.unwrap();

    let stored = h.task_runs.stored("build-1");
    assert!(stored.is_successful());
    assert!(stored.status.as_ref().unwrap().completion_time.is_some());
    assert!(h.events.reasons().contains(&"Succeeded".to_string()));

    // The next pass sees a done TaskRun
    h.reconcile("build-1").await.unwrap();
    assert!(!h.timer_armed("build-1"));
    assert_eq!(h.pods.created(), 1);
}

#[tokio::test]
async fn test_failed_notification_blocks_cleanup_until_delivered() {
    let h = Harness::new();
    let mut tr = started(
        task_run("build-1", 10 * MINUTE),
        Condition::succeeded(ConditionStatus::True, ConditionReason::Succeeded, "done"),
    );
    tr.status_mut().cloud_events.push(CloudEventDelivery {
        target: "http://sink.example/events".to_string(),
        status: Default::default(),
    });
    h.pods.insert(pod_for(&tr));
    h.task_runs.insert(tr);
    h.reconciler
        .timeouts
        .set_task_run_timer("default/build-1", Duration::from_secs(3600));
    h.cloud_events.fail.store(true, Ordering::SeqCst);

    assert!(h.reconcile("build-1").await.is_err());
    assert_eq!(h.pods.replaced.load(Ordering::SeqCst), 0, "sidecars untouched");
    assert!(h.timer_armed("build-1"), "timers kept until delivery");
    let delivery = h.task_runs.stored("build-1").status.unwrap().cloud_events[0].clone();
    assert_eq!(delivery.status.condition, CloudEventCondition::Failed);
    assert_eq!(delivery.status.retry_count, 1);

    h.cloud_events.fail.store(false, Ordering::SeqCst);
    h.reconcile("build-1").await.unwrap();

    assert_eq!(h.pods.replaced.load(Ordering::SeqCst), 1);
    let pod = h.pods.get_stored("build-1-pod").unwrap();
    let sidecar = &pod.spec.unwrap().containers[1];
    assert_eq!(sidecar.image.as_deref(), Some(h.reconciler.config.nop_image.as_str()));
    assert!(!h.timer_armed("build-1"));
    assert_eq!(
        *h.cloud_events.delivered.lock().unwrap(),
        vec!["http://sink.example/events".to_string()]
    );
    let delivery = h.task_runs.stored("build-1").status.unwrap().cloud_events[0].clone();
    assert_eq!(delivery.status.condition, CloudEventCondition::Sent);
}

#[tokio::test]
async fn test_long_names_get_their_own_pods() {
    let h = Harness::new();
    let first = format!("{}x", "a".repeat(70));
    let second = format!("{}y", "a".repeat(70));
    h.task_runs.insert(task_run(&first, MINUTE));
    h.task_runs.insert(task_run(&second, MINUTE));

    h.reconcile(&first).await.unwrap();
    h.reconcile(&second).await.unwrap();

    let first_pod = h.task_runs.stored(&first).pod_name().map(str::to_string);
    let second_pod = h.task_runs.stored(&second).pod_name().map(str::to_string);
    assert!(first_pod.is_some() && second_pod.is_some());
    assert_ne!(first_pod, second_pod);
    assert_eq!(h.pods.created(), 2);
}

#[tokio::test]
async fn test_pod_of_another_task_run_is_not_adopted() {
    let h = Harness::new();
    let mut foreign = pod_for(&task_run("build-1", MINUTE));
    foreign
        .metadata
        .labels
        .as_mut()
        .unwrap()
        .insert(TASK_RUN_LABEL_KEY.to_string(), "someone-else".to_string());
    h.pods.insert(foreign);
    h.task_runs.insert(task_run("build-1", MINUTE));

    h.reconcile("build-1").await.unwrap();

    assert_eq!(h.pods.created(), 0);
    let stored = h.task_runs.stored("build-1");
    assert_eq!(stored.pod_name(), None);
    let condition = succeeded(&stored);
    assert_eq!(condition.status, ConditionStatus::False);
    assert!(condition.message.contains("belongs to another TaskRun"), "{}", condition.message);
}

#[tokio::test]
async fn test_existing_pod_rearms_timeout_after_restart() {
    let h = Harness::new();
    let tr = started(
        task_run("build-1", MINUTE),
        Condition::succeeded(ConditionStatus::Unknown, ConditionReason::Running, "running"),
    );
    h.pods.insert(pod_for(&tr));
    h.task_runs.insert(tr);
    assert!(!h.timer_armed("build-1"));

    h.reconcile("build-1").await.unwrap();

    assert!(h.timer_armed("build-1"));
    assert_eq!(h.pods.created(), 0);
}

#[tokio::test]
async fn test_branch_error_still_persists_status() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.reconcile("build-1").await.unwrap();
    let writes = h.task_runs.writes();

    h.pods.set_status(
        "build-1-pod",
        pod_status("Succeeded", vec![terminated_container("step-compile", 0, "{oops")]),
    );
    let err = h.reconcile("build-1").await.unwrap_err();

    assert!(matches!(err, ReconcilerError::ResultMessage { index: 0, .. }), "{err}");
    assert!(h.task_runs.writes() > writes, "status of the failed pass is written");
    assert!(h.task_runs.stored("build-1").is_successful());
}

#[tokio::test]
async fn test_failed_status_write_still_writes_labels() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.task_runs.fail_status_patch.store(true, Ordering::SeqCst);

    assert!(h.reconcile("build-1").await.is_err());

    assert_eq!(h.task_runs.status_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(h.task_runs.metadata_writes.load(Ordering::SeqCst), 1);
    let stored = h.task_runs.stored("build-1");
    assert_eq!(
        stored.metadata.labels.unwrap().get(TASK_LABEL_KEY).map(String::as_str),
        Some("build")
    );
}

#[tokio::test]
async fn test_both_write_failures_are_reported() {
    let h = Harness::new();
    h.task_runs.insert(task_run("build-1", MINUTE));
    h.task_runs.fail_status_patch.store(true, Ordering::SeqCst);
    h.task_runs.fail_metadata_patch.store(true, Ordering::SeqCst);

    let err = h.reconcile("build-1").await.unwrap_err();

    assert_eq!(h.task_runs.metadata_attempts.load(Ordering::SeqCst), 1);
    match err {
        ReconcilerError::Multiple(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected both write failures, got {other}"),
    }
}

#[tokio::test]
async fn test_deleted_task_run_forgets_error_backoff() {
    let h = Harness::new();
    h.reconciler
        .backoff_states
        .lock()
        .unwrap()
        .insert("default/gone".to_string(), BackoffState::new(&h.reconciler.config));

    h.reconcile("gone").await.unwrap();

    assert!(!h.reconciler.backoff_states.lock().unwrap().contains_key("default/gone"));
}

//! # Pod Status Translation
//!
//! Mirrors a pod's observed state into TaskRun status: step and sidecar
//! states, pod name, and the `Succeeded` condition.

use super::{is_container_sidecar, is_container_step, is_pod_exceeding_node_resources, step_container_name};
use crate::constants::{SIDECAR_PREFIX, STEP_PREFIX};
use crate::crd::{
    time_to_chrono, ConditionReason, ConditionStatus, ContainerRunState, ContainerRunning,
    ContainerTerminated, ContainerWaiting, TaskRun, TaskRunStatus, TaskSpec,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};
use kube::ResourceExt;

const RUNNING_MESSAGE: &str = "Not all Steps in the Task have finished executing";

/// Compute the TaskRun status implied by `pod`.
///
/// Starts from the TaskRun's current status, so start time, cloud events and
/// results carry over. `now` stamps condition transitions and completion.
pub fn make_task_run_status(
    tr: &TaskRun,
    pod: &Pod,
    task_spec: &TaskSpec,
    now: DateTime<Utc>,
) -> TaskRunStatus {
    let mut status = tr.status.clone().unwrap_or_default();
    let pod_status = pod.status.clone().unwrap_or_default();

    if status.succeeded_condition().is_none_or(|c| c.is_unknown()) {
        status.mark(
            ConditionStatus::Unknown,
            ConditionReason::Running,
            RUNNING_MESSAGE,
            now,
        );
    }

    status.pod_name = pod.name_any();
    status.steps.clear();
    status.sidecars.clear();
    for container in pod_status.container_statuses.iter().flatten() {
        if is_container_step(&container.name) {
            status.steps.push(container_run_state(container, STEP_PREFIX));
        } else if is_container_sidecar(&container.name) {
            status.sidecars.push(container_run_state(container, SIDECAR_PREFIX));
        }
    }

    let phase = pod_status.phase.as_deref().unwrap_or_default();
    let complete = are_steps_complete(&pod_status) || phase == "Succeeded" || phase == "Failed";
    if complete {
        if did_task_run_fail(&pod_status) {
            status.mark(
                ConditionStatus::False,
                ConditionReason::Failed,
                failure_message(pod, &pod_status),
                now,
            );
        } else {
            status.mark(
                ConditionStatus::True,
                ConditionReason::Succeeded,
                "All Steps have completed executing",
                now,
            );
        }
        status.completion_time.get_or_insert(now);
    } else {
        match phase {
            "Running" => status.mark(
                ConditionStatus::Unknown,
                ConditionReason::Running,
                RUNNING_MESSAGE,
                now,
            ),
            "Pending" => {
                if is_pod_exceeding_node_resources(pod) {
                    status.mark(
                        ConditionStatus::Unknown,
                        ConditionReason::ExceededNodeResources,
                        "TaskRun Pod exceeded available resources",
                        now,
                    );
                } else {
                    status.mark(
                        ConditionStatus::Unknown,
                        ConditionReason::Pending,
                        waiting_message(&pod_status),
                        now,
                    );
                }
            }
            _ => {}
        }
    }

    sort_steps(&mut status, task_spec);
    status
}

fn container_run_state(container: &ContainerStatus, prefix: &str) -> ContainerRunState {
    let state = container.state.clone().unwrap_or_default();
    ContainerRunState {
        name: container
            .name
            .strip_prefix(prefix)
            .unwrap_or(&container.name)
            .to_string(),
        container_name: container.name.clone(),
        image_id: container.image_id.clone(),
        waiting: state.waiting.map(|w| ContainerWaiting {
            reason: w.reason.unwrap_or_default(),
            message: w.message.unwrap_or_default(),
        }),
        running: state.running.map(|r| ContainerRunning {
            started_at: r.started_at.as_ref().and_then(time_to_chrono),
        }),
        terminated: state.terminated.map(|t| ContainerTerminated {
            exit_code: t.exit_code,
            reason: t.reason.unwrap_or_default(),
            message: t.message.unwrap_or_default(),
            started_at: t.started_at.as_ref().and_then(time_to_chrono),
            finished_at: t.finished_at.as_ref().and_then(time_to_chrono),
        }),
    }
}

fn terminated_exit_code(container: &ContainerStatus) -> Option<i32> {
    container
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .map(|t| t.exit_code)
}

/// All step containers terminated while the pod itself is still running
fn are_steps_complete(pod_status: &PodStatus) -> bool {
    let statuses = pod_status.container_statuses.as_deref().unwrap_or_default();
    !statuses.is_empty()
        && pod_status.phase.as_deref() == Some("Running")
        && statuses
            .iter()
            .filter(|c| is_container_step(&c.name))
            .all(|c| terminated_exit_code(c).is_some())
}

fn did_task_run_fail(pod_status: &PodStatus) -> bool {
    pod_status.phase.as_deref() == Some("Failed")
        || pod_status
            .container_statuses
            .iter()
            .flatten()
            .filter(|c| is_container_step(&c.name))
            .any(|c| terminated_exit_code(c).is_some_and(|code| code != 0))
}

fn failure_message(pod: &Pod, pod_status: &PodStatus) -> String {
    for container in pod_status.container_statuses.iter().flatten() {
        if let Some(code) = terminated_exit_code(container).filter(|code| *code != 0) {
            return format!(
                "{:?} exited with code {} (image: {:?}); for logs run: kubectl -n {} logs {} -c {}",
                container.name,
                code,
                container.image_id,
                pod.namespace().unwrap_or_default(),
                pod.name_any(),
                container.name
            );
        }
    }
    match pod_status.message.as_deref() {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => "build failed for unspecified reasons.".to_string(),
    }
}

fn waiting_message(pod_status: &PodStatus) -> String {
    for container in pod_status.container_statuses.iter().flatten() {
        let waiting = container.state.as_ref().and_then(|s| s.waiting.as_ref());
        if let Some(message) = waiting.and_then(|w| w.message.as_deref()).filter(|m| !m.is_empty()) {
            return format!(
                "build step {:?} is pending with reason {:?}",
                container.name, message
            );
        }
    }
    for condition in pod_status.conditions.iter().flatten() {
        if condition.status != "True" {
            return format!(
                "pod status {:?}:{:?}; message: {:?}",
                condition.type_,
                condition.status,
                condition.message.as_deref().unwrap_or_default()
            );
        }
    }
    match pod_status.message.as_deref() {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => "Pending".to_string(),
    }
}

/// Order step states the way the task declares its steps
fn sort_steps(status: &mut TaskRunStatus, task_spec: &TaskSpec) {
    let order: Vec<String> = task_spec
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| step_container_name(&step.name, index))
        .collect();
    status.steps.sort_by_key(|state| {
        order
            .iter()
            .position(|name| *name == state.container_name)
            .unwrap_or(usize::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Step;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, PodCondition,
    };

    fn taskrun() -> TaskRun {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "tekton.dev/v1alpha1",
            "kind": "TaskRun",
            "metadata": {"name": "run", "namespace": "ci"},
            "spec": {"taskRef": {"name": "build"}}
        }))
        .unwrap()
    }

    fn spec(steps: &[&str]) -> TaskSpec {
        TaskSpec {
            steps: steps
                .iter()
                .map(|name| Step {
                    name: (*name).to_string(),
                    image: "busybox".to_string(),
                    ..Step::default()
                })
                .collect(),
            ..TaskSpec::default()
        }
    }

    fn terminated(name: &str, exit_code: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            image_id: "docker://sha".to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    ..ContainerStateTerminated::default()
                }),
                ..ContainerState::default()
            }),
            ..ContainerStatus::default()
        }
    }

    fn running(name: &str) -> ContainerStatus {
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

    fn pod(phase: &str, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            metadata: kube::api::ObjectMeta {
                name: Some("run-pod".to_string()),
                namespace: Some("ci".to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(statuses),
                ..PodStatus::default()
            }),
        }
    }

    #[test]
    fn test_all_steps_terminated_successfully_marks_succeeded() {
        let now = Utc::now();
        let p = pod(
            "Running",
            vec![terminated("step-b", 0), terminated("step-a", 0), running("sidecar-db")],
        );
        let status = make_task_run_status(&taskrun(), &p, &spec(&["a", "b"]), now);

        let cond = status.succeeded_condition().unwrap();
        assert!(cond.is_true());
        assert_eq!(cond.reason, "Succeeded");
        assert_eq!(status.completion_time, Some(now));
        assert_eq!(status.pod_name, "run-pod");
        let order: Vec<_> = status.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(status.sidecars[0].name, "db");
    }

    #[test]
    fn test_failed_step_marks_failed_with_logs_hint() {
        let p = pod("Running", vec![terminated("step-a", 2)]);
        let status = make_task_run_status(&taskrun(), &p, &spec(&["a"]), Utc::now());
        let cond = status.succeeded_condition().unwrap();
        assert!(cond.is_false());
        assert!(cond.message.contains("exited with code 2"));
        assert!(cond.message.contains("kubectl -n ci logs run-pod -c step-a"));
    }

    #[test]
    fn test_running_step_keeps_unknown() {
        let p = pod("Running", vec![terminated("step-a", 0), running("step-b")]);
        let status = make_task_run_status(&taskrun(), &p, &spec(&["a", "b"]), Utc::now());
        let cond = status.succeeded_condition().unwrap();
        assert!(cond.is_unknown());
        assert_eq!(cond.reason, "Running");
        assert!(status.completion_time.is_none());
    }

    #[test]
    fn test_pending_unschedulable_pod_reports_node_resources() {
        let mut p = pod("Pending", Vec::new());
        if let Some(status) = p.status.as_mut() {
            status.conditions = Some(vec![PodCondition {
                type_: "PodScheduled".to_string(),
                status: "False".to_string(),
                reason: Some("Unschedulable".to_string()),
                message: Some("0/3 nodes are available: 3 Insufficient cpu.".to_string()),
                ..PodCondition::default()
            }]);
        }
        let status = make_task_run_status(&taskrun(), &p, &spec(&["a"]), Utc::now());
        assert_eq!(
            status.succeeded_condition().unwrap().reason,
            "ExceededNodeResources"
        );
    }

    #[test]
    fn test_pending_pod_reports_pending_condition() {
        let mut p = pod("Pending", Vec::new());
        if let Some(status) = p.status.as_mut() {
            status.conditions = Some(vec![PodCondition {
                type_: "PodScheduled".to_string(),
                status: "False".to_string(),
                message: Some("waiting".to_string()),
                ..PodCondition::default()
            }]);
        }
        let status = make_task_run_status(&taskrun(), &p, &spec(&["a"]), Utc::now());
        let cond = status.succeeded_condition().unwrap();
        assert_eq!(cond.reason, "Pending");
        assert!(cond.message.contains("PodScheduled"));
    }
}

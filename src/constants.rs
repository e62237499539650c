//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the TaskRun, Task, ClusterTask and PipelineResource kinds
pub const GROUP_NAME: &str = "tekton.dev";

/// Label set on a TaskRun (and its pod) naming the referenced Task
pub const TASK_LABEL_KEY: &str = "tekton.dev/task";

/// Label set on a pod naming the TaskRun that owns it
pub const TASK_RUN_LABEL_KEY: &str = "tekton.dev/taskRun";

/// Pod annotation used as the readiness gate for step containers
pub const READY_ANNOTATION: &str = "tekton.dev/ready";

/// Value of [`READY_ANNOTATION`] once all sidecars are ready
pub const READY_ANNOTATION_VALUE: &str = "READY";

/// Container name prefixes assigned by the pod builder
pub const STEP_PREFIX: &str = "step-";
pub const SIDECAR_PREFIX: &str = "sidecar-";

/// Kubernetes object names are limited to 63 characters
pub const MAX_NAME_LENGTH: usize = 63;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default TaskRun timeout when `spec.timeout` is unset
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Service account used by pods when the TaskRun names none
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Image swapped into running sidecars to stop them
pub const DEFAULT_NOP_IMAGE: &str = "gcr.io/tekton-releases/github.com/tektoncd/pipeline/cmd/nop:latest";

/// Error-policy exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Error-policy exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Quota backoff base delay (seconds), doubled per attempt
pub const DEFAULT_QUOTA_BACKOFF_BASE_SECS: u64 = 1;

/// Quota backoff cap (seconds)
pub const DEFAULT_QUOTA_BACKOFF_MAX_SECS: u64 = 120;

/// Maximum delivery attempts per cloud event before it stops blocking cleanup
pub const DEFAULT_CLOUD_EVENT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "taskrun-controller";

//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use taskrun_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (TaskRun, Task, ClusterTask, PipelineResource, etc.)
//! - The client traits the reconciler is built on
//! - Reconciler types (Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig, ServerConfig)

// CRD types - most commonly used
pub use crate::crd::*;

// Collaborator traits - implemented by the Kubernetes clients and test fakes
pub use crate::cloudevent::CloudEventClient;
pub use crate::controller::events::EventSink;
pub use crate::pod::PodBuilder;
pub use crate::store::{PipelineResourceClient, PodClient, StoreError, TaskClient, TaskRunClient};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig};

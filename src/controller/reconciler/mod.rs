//! # Reconciler
//!
//! Core reconciliation logic for `TaskRun` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Fetch the TaskRun and work on a private copy
//! 2. Done TaskRuns: deliver cloud events, release timers, stop sidecars
//! 3. Active TaskRuns:
//!    - Cancellation and timeout stop the pod
//!    - Resolve and validate the task and its resources
//!    - Get or create the pod and mirror its state into the status
//! 4. Persist status and labels/annotations that changed

mod active;
mod finalize;
mod pod;
pub mod reconcile;
mod results;
mod status;
pub mod types;

// Re-export public API
pub use reconcile::reconcile;
pub use types::{BackoffState, ErrorList, InvalidKey, Reconciler, ReconcilerError, TaskRunKey};

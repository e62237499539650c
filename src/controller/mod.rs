//! # Controller
//!
//! Core controller modules for the TaskRun controller.
//!
//! - `backoff`: Exponential backoff for error-policy retries
//! - `events`: Kubernetes events about TaskRuns
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `timeout`: Per-TaskRun timeout timers and quota backoff
//! - `tracker`: Pod → TaskRun index used by the pod watch

pub mod backoff;
pub mod events;
pub mod reconciler;
pub mod server;
pub mod timeout;
pub mod tracker;

//! # Observability
//!
//! Prometheus metrics for the controller and the TaskRuns it reconciles.

pub mod metrics;

pub use metrics::*;

//! TaskRun Controller Library
//!
//! This library provides the core functionality for the TaskRun controller.
//! Unit tests live next to the code; integration tests under `tests/` drive
//! the reconciler against in-memory fakes.
//!
//! ## Quick Start
//!
//! ```rust
//! use taskrun_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cloudevent;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod pod;
pub mod prelude;
pub mod resolve;
pub mod runtime;
pub mod store;

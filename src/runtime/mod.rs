//! # Runtime
//!
//! Wiring of the controller process: initialization, the watch loop and its
//! error policy, and the timer-driven requeue channel.

pub mod error_policy;
pub mod initialization;
pub mod requeue;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;

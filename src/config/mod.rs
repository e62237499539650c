//! # Configuration
//!
//! Environment-driven configuration for the controller and its HTTP server.
//!
//! Values are read once at startup. Environment variables are typically
//! populated from a ConfigMap via `envFrom` in the deployment.

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

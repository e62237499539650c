//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::TaskRun;
use crate::observability;
use crate::runtime::requeue::TimerRequeue;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// TaskRuns across all namespaces
    pub task_runs: Api<TaskRun>,
    /// Pods across all namespaces
    pub pods: Api<Pod>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Channel feeding timer requeues into the controller
    pub requeue: Arc<TimerRequeue>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub controller_config: Arc<ControllerConfig>,
    pub server_config: ServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("controller_config", &self.controller_config)
            .field("server_config", &self.server_config)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` applies to this crate.
fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("taskrun_controller={}", config.log_level.to_lowercase()).into()
    });
    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize() -> Result<InitializationResult> {
    // Required for rustls 0.23+ before any TLS connection is made
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    let controller_config = Arc::new(ControllerConfig::from_env());
    let server_config = ServerConfig::from_env();
    init_tracing(&controller_config);

    info!("Starting TaskRun Controller");
    info!(
        "Build info: timestamp={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());

    // Start HTTP server in the background and wait for it before reconciling
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let task_runs: Api<TaskRun> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    let requeue = Arc::new(TimerRequeue::new());
    let reconciler = Arc::new(
        Reconciler::new(client.clone(), Arc::clone(&controller_config), requeue.callback())
            .context("Failed to create reconciler")?,
    );

    summarize_existing_task_runs(&task_runs).await;
    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        task_runs,
        pods,
        reconciler,
        requeue,
        server_state,
        controller_config,
        server_config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log the TaskRuns present at startup, per namespace.
///
/// The controller's initial list reconciles every one of them; this only
/// checks that the CRD is queryable and gives operators a summary.
async fn summarize_existing_task_runs(task_runs: &Api<TaskRun>) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.summary",
        operation = "summarize_existing_task_runs"
    );
    let listed = task_runs
        .list(&ListParams::default())
        .instrument(span.clone())
        .await;
    let _guard = span.enter();

    match listed {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, (usize, usize)> = BTreeMap::new();
            for tr in &list.items {
                let entry = by_namespace
                    .entry(tr.metadata.namespace.clone().unwrap_or_default())
                    .or_default();
                entry.0 += 1;
                if !tr.is_done() {
                    entry.1 += 1;
                }
            }
            info!("TaskRun Controller - Startup Resource Summary");
            info!("Total TaskRuns: {}", list.items.len());
            for (namespace, (total, running)) in &by_namespace {
                info!("Namespace: {} ({} TaskRuns, {} not done)", namespace, total, running);
            }
        }
        Err(e) => {
            warn!(
                "Failed to list TaskRuns (is the CRD installed?): {} - the watch will keep retrying",
                e
            );
        }
    }
}

//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name used as field manager and event reporter
    pub controller_name: String,
    /// Timeout applied to TaskRuns that do not declare one (minutes)
    pub default_timeout_minutes: u64,
    /// Service account for pods of TaskRuns that name none
    pub default_service_account: String,
    /// Image swapped into running sidecars to stop them once a TaskRun is done
    pub nop_image: String,
    /// Error-policy backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Error-policy backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Quota backoff base delay (seconds), doubled per attempt
    pub quota_backoff_base_secs: u64,
    /// Quota backoff cap (seconds)
    pub quota_backoff_max_secs: u64,
    /// Add up to one second of random jitter to quota backoff
    pub quota_backoff_jitter: bool,
    /// Delivery attempts per cloud event before giving up
    pub cloud_event_max_attempts: u32,
    /// Maximum concurrent reconciliations
    /// Limits how many TaskRuns can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            controller_name: CONTROLLER_NAME.to_string(),
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            default_service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            nop_image: DEFAULT_NOP_IMAGE.to_string(),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            quota_backoff_base_secs: DEFAULT_QUOTA_BACKOFF_BASE_SECS,
            quota_backoff_max_secs: DEFAULT_QUOTA_BACKOFF_MAX_SECS,
            quota_backoff_jitter: true,
            cloud_event_max_attempts: DEFAULT_CLOUD_EVENT_MAX_ATTEMPTS,
            max_concurrent_reconciliations: 10,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            controller_name: env_var_or_default_str("CONTROLLER_NAME", CONTROLLER_NAME),
            default_timeout_minutes: env_var_or_default(
                "DEFAULT_TIMEOUT_MINUTES",
                DEFAULT_TIMEOUT_MINUTES,
            ),
            default_service_account: env_var_or_default_str(
                "DEFAULT_SERVICE_ACCOUNT",
                DEFAULT_SERVICE_ACCOUNT,
            ),
            nop_image: env_var_or_default_str("NOP_IMAGE", DEFAULT_NOP_IMAGE),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            quota_backoff_base_secs: env_var_or_default(
                "QUOTA_BACKOFF_BASE_SECS",
                DEFAULT_QUOTA_BACKOFF_BASE_SECS,
            ),
            quota_backoff_max_secs: env_var_or_default(
                "QUOTA_BACKOFF_MAX_SECS",
                DEFAULT_QUOTA_BACKOFF_MAX_SECS,
            ),
            quota_backoff_jitter: env_var_or_default_bool("QUOTA_BACKOFF_JITTER", true),
            cloud_event_max_attempts: env_var_or_default(
                "CLOUD_EVENT_MAX_ATTEMPTS",
                DEFAULT_CLOUD_EVENT_MAX_ATTEMPTS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                10,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get the default TaskRun timeout
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_minutes * 60)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn quota_backoff_base_duration(&self) -> Duration {
        Duration::from_secs(self.quota_backoff_base_secs)
    }

    pub fn quota_backoff_max_duration(&self) -> Duration {
        Duration::from_secs(self.quota_backoff_max_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

//! Pod → TaskRun side index.
//!
//! The pod watch mapper consults the tracker to find which TaskRuns to
//! re-enqueue when a pod changes. Entries are added by the active reconciler
//! once the TaskRun's pod exists and dropped when the TaskRun goes away.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracking reference: {0}")]
    InvalidReference(String),

    #[error("tracker index lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
pub struct Tracker {
    /// Pod key ("namespace/name") → TaskRun keys observing it
    index: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_run_key` observes the pod `namespace/pod_name`
    pub fn track(&self, namespace: &str, pod_name: &str, task_run_key: &str) -> Result<(), TrackerError> {
        if namespace.is_empty() || pod_name.is_empty() {
            return Err(TrackerError::InvalidReference(format!(
                "pod reference {namespace:?}/{pod_name:?} must have a namespace and a name"
            )));
        }
        if task_run_key.is_empty() {
            return Err(TrackerError::InvalidReference("empty TaskRun key".to_string()));
        }
        let mut index = self.index.lock().map_err(|_poisoned| TrackerError::Poisoned)?;
        index
            .entry(format!("{namespace}/{pod_name}"))
            .or_default()
            .insert(task_run_key.to_string());
        Ok(())
    }

    /// TaskRun keys observing the pod `namespace/pod_name`
    pub fn lookup(&self, namespace: &str, pod_name: &str) -> Vec<String> {
        self.index
            .lock()
            .ok()
            .and_then(|index| {
                index
                    .get(&format!("{namespace}/{pod_name}"))
                    .map(|keys| keys.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Drop every entry for `task_run_key`
    pub fn untrack(&self, task_run_key: &str) {
        if let Ok(mut index) = self.index.lock() {
            index.retain(|_, keys| {
                keys.remove(task_run_key);
                !keys.is_empty()
            });
        }
    }
}

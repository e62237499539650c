//! # Timeouts
//!
//! Per-TaskRun timers and quota backoff records.
//!
//! A timer is armed when the TaskRun's pod is first created and fires a
//! callback (which re-enqueues the TaskRun) once the TaskRun's timeout has
//! elapsed since its start time. Quota backoff timers re-enqueue the TaskRun
//! when the next pod creation attempt is due. Releasing a key cancels every
//! timer armed for it and forgets its backoff record.

use super::backoff::exponential_delay;
use crate::config::ControllerConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Called with the TaskRun key when a timer fires
pub type TimerCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Quota backoff state for one TaskRun
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRecord {
    pub attempts: u32,
    pub next_attempt: DateTime<Utc>,
}

pub struct TimeoutSet {
    /// Dropping a sender wakes and cancels every timer subscribed to it
    done: Mutex<HashMap<String, watch::Sender<()>>>,
    backoffs: Mutex<HashMap<String, BackoffRecord>>,
    callback: TimerCallback,
    quota_base: Duration,
    quota_max: Duration,
    jitter: bool,
}

impl std::fmt::Debug for TimeoutSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSet")
            .field("quota_base", &self.quota_base)
            .field("quota_max", &self.quota_max)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl TimeoutSet {
    pub fn new(callback: TimerCallback, quota_base: Duration, quota_max: Duration, jitter: bool) -> Self {
        Self {
            done: Mutex::new(HashMap::new()),
            backoffs: Mutex::new(HashMap::new()),
            callback,
            quota_base,
            quota_max,
            jitter,
        }
    }

    pub fn from_config(callback: TimerCallback, config: &ControllerConfig) -> Self {
        Self::new(
            callback,
            config.quota_backoff_base_duration(),
            config.quota_backoff_max_duration(),
            config.quota_backoff_jitter,
        )
    }

    /// Current backoff record for `key`, if any
    pub fn backoff(&self, key: &str) -> Option<BackoffRecord> {
        match self.backoffs.lock() {
            Ok(backoffs) => backoffs.get(key).copied(),
            Err(e) => {
                warn!("Failed to lock backoff records: {}", e);
                None
            }
        }
    }

    /// True while at least one timer is armed for `key`
    pub fn is_armed(&self, key: &str) -> bool {
        self.done
            .lock()
            .map(|done| done.contains_key(key))
            .unwrap_or(false)
    }

    /// Register a quota failure for `key` observed at `now`.
    ///
    /// While `now` is before the recorded horizon the record is returned
    /// unchanged with `true` (already backing off). Otherwise the attempt count
    /// is incremented and a new horizon computed as `now + base * 2^attempts`
    /// (capped, plus jitter), clamped to `start_time + timeout`; `false` is
    /// returned so the caller arms a timer for it.
    pub fn get_backoff_at(
        &self,
        key: &str,
        start_time: DateTime<Utc>,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> (BackoffRecord, bool) {
        let mut backoffs = match self.backoffs.lock() {
            Ok(backoffs) => backoffs,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = backoffs.entry(key.to_string()).or_insert(BackoffRecord {
            attempts: 0,
            next_attempt: now,
        });
        if record.attempts > 0 && now < record.next_attempt {
            return (*record, true);
        }

        record.attempts += 1;
        let mut delay = exponential_delay(self.quota_base, record.attempts, self.quota_max);
        if self.jitter {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        }
        let horizon = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let deadline = start_time + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        record.next_attempt = horizon.min(deadline);
        (*record, false)
    }

    /// Forget the backoff record for `key`, keeping any armed timers
    pub fn clear_backoff(&self, key: &str) {
        if let Ok(mut backoffs) = self.backoffs.lock() {
            backoffs.remove(key);
        }
    }

    /// Cancel every timer for `key` and forget its backoff record.
    ///
    /// Returns whether there was anything to release.
    pub fn release(&self, key: &str) -> bool {
        let timer = match self.done.lock() {
            Ok(mut done) => done.remove(key),
            Err(e) => {
                warn!("Failed to lock timer registry: {}", e);
                None
            }
        };
        let backoff = match self.backoffs.lock() {
            Ok(mut backoffs) => backoffs.remove(key),
            Err(_) => None,
        };
        let released = timer.is_some() || backoff.is_some();
        if released {
            debug!(key = key, "Released timers and backoff");
        }
        released
    }

    fn subscribe(&self, key: &str) -> Option<watch::Receiver<()>> {
        let mut done = self.done.lock().ok()?;
        Some(
            done.entry(key.to_string())
                .or_insert_with(|| watch::channel(()).0)
                .subscribe(),
        )
    }

    /// Arm the TaskRun timeout timer in the background.
    ///
    /// Fires `timeout` after `start_time` (immediately if already past) unless
    /// released first. A fired timeout releases the key.
    pub fn wait_task_run(self: &Arc<Self>, key: &str, start_time: DateTime<Utc>, timeout: Duration) {
        let elapsed = (Utc::now() - start_time).to_std().unwrap_or(Duration::ZERO);
        let remaining = timeout
            .checked_sub(elapsed)
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_millis(1));
        self.spawn_timer(key, remaining, true);
    }

    /// Re-enqueue `key` after `delay` unless released first
    pub fn set_task_run_timer(self: &Arc<Self>, key: &str, delay: Duration) {
        self.spawn_timer(key, delay, false);
    }

    fn spawn_timer(self: &Arc<Self>, key: &str, delay: Duration, release_after: bool) {
        let Some(mut finished) = self.subscribe(key) else {
            warn!(key = key, "Failed to arm timer");
            return;
        };
        let this = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                // Err means the sender was dropped by release()
                _ = finished.changed() => {
                    debug!(key = key.as_str(), "Timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    debug!(key = key.as_str(), delay_ms = delay.as_millis(), "⏰ Timer fired");
                    (this.callback)(&key);
                    if release_after {
                        this.release(&key);
                    }
                }
            }
        });
    }
}

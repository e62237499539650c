//! # Conditions
//!
//! The `Succeeded` condition carried by TaskRun status and the closed set of
//! reasons the controller writes into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of the single authoritative TaskRun condition
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons written into the `Succeeded` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionReason {
    /// Task reference could not be resolved or the task spec is invalid
    CouldntGetTask,
    /// Task or bound resources could not be resolved
    ResolutionFailed,
    /// Params, resources or workspace bindings do not match the task
    ValidationFailed,
    /// Pod cannot be scheduled because no node has enough resources
    ExceededNodeResources,
    /// Pod creation was rejected by a namespace ResourceQuota
    ExceededResourceQuota,
    /// TaskRun did not finish within its timeout
    Timeout,
    /// Pod created but not yet running
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Cancellation requested through `spec.status`
    Cancelled,
}

impl ConditionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::CouldntGetTask => "CouldntGetTask",
            ConditionReason::ResolutionFailed => "TaskRunResolutionFailed",
            ConditionReason::ValidationFailed => "TaskRunValidationFailed",
            ConditionReason::ExceededNodeResources => "ExceededNodeResources",
            ConditionReason::ExceededResourceQuota => "ExceededResourceQuota",
            ConditionReason::Timeout => "TaskRunTimeout",
            ConditionReason::Pending => "Pending",
            ConditionReason::Running => "Running",
            ConditionReason::Succeeded => "Succeeded",
            ConditionReason::Failed => "Failed",
            ConditionReason::Cancelled => "TaskRunCancelled",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConditionReason> for String {
    fn from(reason: ConditionReason) -> Self {
        reason.as_str().to_string()
    }
}

/// A status condition
///
/// Two conditions are considered the same state when type, status, reason and
/// message match; the transition time is bookkeeping only.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Build a `Succeeded` condition
    pub fn succeeded(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: CONDITION_SUCCEEDED.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    #[must_use]
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    /// Same observable state, ignoring the transition time
    #[must_use]
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace `condition` in `conditions`.
///
/// When an identical condition is already present the existing transition
/// time is kept, otherwise the condition is stamped with `now`.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        if existing.same_state(&condition) {
            return;
        }
        condition.last_transition_time = Some(now);
        *existing = condition;
        return;
    }
    condition.last_transition_time = Some(now);
    conditions.push(condition);
}

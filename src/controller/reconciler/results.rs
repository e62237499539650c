//! Resource results reported by steps through their termination messages.

use super::types::ReconcilerError;
use crate::crd::TaskRun;
use crate::pod::parse_termination_message;
use k8s_openapi::api::core::v1::Pod;

/// Append the results of every terminated container to the TaskRun's
/// `resourcesResult`, skipping entries already present.
///
/// Only successful TaskRuns report results.
pub(crate) fn update_resource_results(tr: &mut TaskRun, pod: &Pod) -> Result<(), ReconcilerError> {
    if !tr.is_successful() {
        return Ok(());
    }
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let mut parsed = Vec::new();
    for (index, container) in statuses.iter().enumerate() {
        let Some(terminated) = container.state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            continue;
        };
        let message = terminated.message.as_deref().unwrap_or_default();
        let results = parse_termination_message(message)
            .map_err(|source| ReconcilerError::ResultMessage { index, source })?;
        parsed.extend(results);
    }

    let status = tr.status_mut();
    for result in parsed {
        if !status.resources_result.contains(&result) {
            status.resources_result.push(result);
        }
    }
    Ok(())
}

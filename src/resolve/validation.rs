//! # Validation
//!
//! Checks that what a TaskRun supplies matches what its task declares:
//! params, input/output resources and workspace bindings.

use super::{ResolvedResource, ResolvedTaskResources};
use crate::crd::{Param, ParamSpec, TaskResource, WorkspaceBinding, WorkspaceDeclaration};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid input params: {0}")]
    Params(String),
    #[error("invalid input resources: {0}")]
    InputResources(String),
    #[error("invalid output resources: {0}")]
    OutputResources(String),
    #[error("invalid workspace bindings: {0}")]
    Workspaces(String),
}

/// Render a name list the way the condition messages have always shown it
fn bracketed(names: &[String]) -> String {
    format!("[{}]", names.join(" "))
}

fn validate_params(specs: &[ParamSpec], params: &[Param]) -> Result<(), String> {
    let needed: BTreeSet<&str> = specs.iter().map(|p| p.name.as_str()).collect();
    let provided: BTreeSet<&str> = params.iter().map(|p| p.name.as_str()).collect();

    let missing_without_default: Vec<String> = specs
        .iter()
        .filter(|spec| !provided.contains(spec.name.as_str()) && spec.default.is_none())
        .map(|spec| spec.name.clone())
        .collect();
    if !missing_without_default.is_empty() {
        return Err(format!(
            "missing values for these params which have no default values: {}",
            bracketed(&missing_without_default)
        ));
    }

    let extra: Vec<String> = params
        .iter()
        .filter(|p| !needed.contains(p.name.as_str()))
        .map(|p| p.name.clone())
        .collect();
    if !extra.is_empty() {
        return Err(format!(
            "didn't need these params but they were provided anyway: {}",
            bracketed(&extra)
        ));
    }

    let wrong_type: Vec<String> = params
        .iter()
        .filter(|p| {
            specs
                .iter()
                .any(|spec| spec.name == p.name && spec.r#type != p.value.param_type())
        })
        .map(|p| p.name.clone())
        .collect();
    if !wrong_type.is_empty() {
        return Err(format!(
            "param types don't match the user-specified type: {}",
            bracketed(&wrong_type)
        ));
    }
    Ok(())
}

fn validate_resources(
    declared: &[TaskResource],
    provided: &BTreeMap<String, ResolvedResource>,
) -> Result<(), String> {
    let missing: Vec<String> = declared
        .iter()
        .filter(|r| !r.optional && !provided.contains_key(&r.name))
        .map(|r| r.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Task's declared required resources are missing from the TaskRun: {}",
            bracketed(&missing)
        ));
    }

    let extra: Vec<String> = provided
        .keys()
        .filter(|name| !declared.iter().any(|r| &r.name == *name))
        .cloned()
        .collect();
    if !extra.is_empty() {
        return Err(format!(
            "TaskRun's declared resources didn't match usage in Task: {}",
            bracketed(&extra)
        ));
    }

    for resource in declared {
        if let Some(bound) = provided.get(&resource.name) {
            if bound.spec.r#type != resource.r#type {
                return Err(format!(
                    "resource {:?} should be type {:?} but was {:?}",
                    resource.name,
                    resource.r#type.as_str(),
                    bound.spec.r#type.as_str()
                ));
            }
        }
    }
    Ok(())
}

/// Validate TaskRun params and bound resources against the resolved task
pub fn validate_resolved_task_resources(
    params: &[Param],
    rtr: &ResolvedTaskResources,
) -> Result<(), ValidationError> {
    validate_params(rtr.task_spec.params(), params).map_err(ValidationError::Params)?;
    validate_resources(rtr.task_spec.input_resources(), &rtr.inputs)
        .map_err(ValidationError::InputResources)?;
    validate_resources(rtr.task_spec.output_resources(), &rtr.outputs)
        .map_err(ValidationError::OutputResources)?;
    Ok(())
}

/// Validate workspace bindings against the task's declared workspaces
///
/// Every declared workspace must be bound exactly once, every binding must
/// match a declaration, and each binding must name exactly one volume source.
pub fn validate_workspace_bindings(
    declarations: &[WorkspaceDeclaration],
    bindings: &[WorkspaceBinding],
) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for binding in bindings {
        if !seen.insert(binding.name.as_str()) {
            return Err(ValidationError::Workspaces(format!(
                "workspace {:?} is bound more than once",
                binding.name
            )));
        }
        if binding.source_count() != 1 {
            return Err(ValidationError::Workspaces(format!(
                "workspace binding {:?} must specify exactly one volume source",
                binding.name
            )));
        }
        if !declarations.iter().any(|d| d.name == binding.name) {
            return Err(ValidationError::Workspaces(format!(
                "workspace binding {:?} does not match any declared workspace",
                binding.name
            )));
        }
    }

    for declaration in declarations {
        if !seen.contains(declaration.name.as_str()) {
            return Err(ValidationError::Workspaces(format!(
                "declared workspace {:?} is required but has not been bound",
                declaration.name
            )));
        }
    }
    Ok(())
}

//! # Pod Builder
//!
//! Default [`PodBuilder`]: one container per step followed by one per sidecar,
//! workspace volumes, and `$(...)` substitution of params, bound resources and
//! workspace paths in every step field.

use super::{sidecar_container_name, step_container_name, PodBuildError, PodBuilder};
use crate::config::ControllerConfig;
use crate::constants::{MAX_NAME_LENGTH, READY_ANNOTATION, READY_ANNOTATION_VALUE, TASK_RUN_LABEL_KEY};
use crate::crd::{
    ArrayOrString, ComputeResources, Step, TaskRun, TaskSpec, WorkspaceBinding,
};
use crate::resolve::{ResolvedResource, ResolvedTaskResources};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaimVolumeSource,
    Pod, PodSpec, ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const POD_SUFFIX: &str = "-pod";

/// Length of an md5 digest in hex
const HASH_LENGTH: usize = 32;

/// Deterministic pod name for a TaskRun, `<name>-pod`.
///
/// Names that would exceed 63 characters keep a prefix of the TaskRun name
/// followed by the md5 of the full name, so distinct TaskRuns never share a
/// pod name.
pub fn pod_name_for(task_run_name: &str) -> String {
    if task_run_name.len() + POD_SUFFIX.len() <= MAX_NAME_LENGTH {
        return format!("{task_run_name}{POD_SUFFIX}");
    }
    let mut cut = MAX_NAME_LENGTH - POD_SUFFIX.len() - HASH_LENGTH;
    while !task_run_name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}{:x}{POD_SUFFIX}",
        &task_run_name[..cut],
        md5::compute(task_run_name.as_bytes())
    )
}

#[derive(Debug, Clone)]
pub struct StandardPodBuilder {
    default_service_account: String,
}

impl StandardPodBuilder {
    pub fn new(default_service_account: impl Into<String>) -> Self {
        Self {
            default_service_account: default_service_account.into(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.default_service_account.clone())
    }

    fn build_pod(&self, tr: &TaskRun, rtr: &ResolvedTaskResources) -> Result<Pod, PodBuildError> {
        let spec = &rtr.task_spec;
        if spec.steps.is_empty() {
            return Err(PodBuildError::NoSteps);
        }

        let workspaces = WorkspaceVolumes::new(spec, &tr.spec.workspaces)?;
        let replacements = Replacements::new(tr, rtr, &workspaces);

        let mut containers = Vec::with_capacity(spec.steps.len() + spec.sidecars.len());
        for (index, step) in spec.steps.iter().enumerate() {
            let name = step_container_name(&step.name, index);
            containers.push(make_container(name, step, &replacements, &workspaces)?);
        }
        for (index, sidecar) in spec.sidecars.iter().enumerate() {
            let name = sidecar_container_name(&sidecar.name, index);
            containers.push(make_container(name, sidecar, &replacements, &workspaces)?);
        }

        let mut labels = tr.labels().clone();
        labels.insert(TASK_RUN_LABEL_KEY.to_string(), tr.name_any());

        let mut annotations = tr.annotations().clone();
        // Without sidecars there is nothing to wait for.
        if spec.sidecars.is_empty() {
            annotations.insert(
                READY_ANNOTATION.to_string(),
                READY_ANNOTATION_VALUE.to_string(),
            );
        }

        let owner = tr.controller_owner_ref(&()).ok_or(PodBuildError::MissingUid)?;

        let service_account = tr
            .spec
            .service_account_name
            .clone()
            .filter(|sa| !sa.is_empty())
            .unwrap_or_else(|| self.default_service_account.clone());

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(pod_name_for(&tr.name_any())),
                namespace: tr.namespace(),
                labels: Some(labels),
                annotations: Some(annotations),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                service_account_name: Some(service_account),
                containers,
                volumes: (!workspaces.volumes.is_empty()).then(|| workspaces.volumes.clone()),
                ..PodSpec::default()
            }),
            status: None,
        })
    }
}

#[async_trait]
impl PodBuilder for StandardPodBuilder {
    async fn build(&self, tr: &TaskRun, rtr: &ResolvedTaskResources) -> Result<Pod, PodBuildError> {
        self.build_pod(tr, rtr)
    }
}

fn make_container(
    name: String,
    step: &Step,
    replacements: &Replacements,
    workspaces: &WorkspaceVolumes,
) -> Result<Container, PodBuildError> {
    let image = replacements.apply(&step.image);
    if image.trim().is_empty() {
        return Err(PodBuildError::MissingImage(name));
    }

    let mut command = replacements.apply_list(&step.command);
    let mut args = replacements.apply_list(&step.args);
    if let Some(script) = &step.script {
        if command.is_empty() {
            command = vec!["/bin/sh".to_string(), "-c".to_string()];
            args = vec![replacements.apply(script)];
        }
    }

    let env: Vec<EnvVar> = step
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: Some(replacements.apply(&e.value)),
            ..EnvVar::default()
        })
        .collect();

    Ok(Container {
        name,
        image: Some(image),
        command: (!command.is_empty()).then_some(command),
        args: (!args.is_empty()).then_some(args),
        working_dir: step.working_dir.as_deref().map(|w| replacements.apply(w)),
        env: (!env.is_empty()).then_some(env),
        resources: step.resources.as_ref().map(resource_requirements),
        volume_mounts: (!workspaces.mounts.is_empty()).then(|| workspaces.mounts.clone()),
        ..Container::default()
    })
}

fn resource_requirements(resources: &ComputeResources) -> ResourceRequirements {
    let quantities = |m: &BTreeMap<String, String>| {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect::<BTreeMap<_, _>>()
        })
    };
    ResourceRequirements {
        requests: quantities(&resources.requests),
        limits: quantities(&resources.limits),
        ..ResourceRequirements::default()
    }
}

/// Volumes and mounts for the task's declared workspaces
struct WorkspaceVolumes {
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
    /// workspace name -> (mount path, volume name)
    paths: BTreeMap<String, (String, String)>,
}

impl WorkspaceVolumes {
    fn new(spec: &TaskSpec, bindings: &[WorkspaceBinding]) -> Result<Self, PodBuildError> {
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        let mut paths = BTreeMap::new();

        for declaration in &spec.workspaces {
            let binding = bindings
                .iter()
                .find(|b| b.name == declaration.name)
                .ok_or_else(|| PodBuildError::UnboundWorkspace(declaration.name.clone()))?;
            let volume_name = format!("ws-{}", declaration.name);
            let mount_path = declaration.effective_mount_path();

            volumes.push(workspace_volume(&volume_name, binding));
            mounts.push(VolumeMount {
                name: volume_name.clone(),
                mount_path: mount_path.clone(),
                read_only: declaration.read_only.then_some(true),
                sub_path: binding.sub_path.clone().filter(|p| !p.is_empty()),
                ..VolumeMount::default()
            });
            paths.insert(declaration.name.clone(), (mount_path, volume_name));
        }

        Ok(Self {
            volumes,
            mounts,
            paths,
        })
    }
}

fn workspace_volume(name: &str, binding: &WorkspaceBinding) -> Volume {
    let mut volume = Volume {
        name: name.to_string(),
        ..Volume::default()
    };
    if let Some(pvc) = &binding.persistent_volume_claim {
        volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
            claim_name: pvc.claim_name.clone(),
            read_only: pvc.read_only.then_some(true),
            ..PersistentVolumeClaimVolumeSource::default()
        });
    } else if let Some(cm) = &binding.config_map {
        volume.config_map = Some(ConfigMapVolumeSource {
            name: cm.name.clone(),
            ..ConfigMapVolumeSource::default()
        });
    } else if let Some(secret) = &binding.secret {
        volume.secret = Some(SecretVolumeSource {
            secret_name: Some(secret.secret_name.clone()),
            ..SecretVolumeSource::default()
        });
    } else {
        volume.empty_dir = Some(EmptyDirVolumeSource {
            medium: binding.empty_dir.as_ref().and_then(|e| e.medium.clone()),
            ..EmptyDirVolumeSource::default()
        });
    }
    volume
}

/// `$(...)` variable values for one TaskRun
struct Replacements {
    strings: BTreeMap<String, String>,
    arrays: BTreeMap<String, Vec<String>>,
}

impl Replacements {
    fn new(tr: &TaskRun, rtr: &ResolvedTaskResources, workspaces: &WorkspaceVolumes) -> Self {
        let mut strings = BTreeMap::new();
        let mut arrays = BTreeMap::new();

        let provided = tr.spec.inputs.as_ref().map_or(&[][..], |i| i.params.as_slice());
        for declared in rtr.task_spec.params() {
            let value = provided
                .iter()
                .find(|p| p.name == declared.name)
                .map(|p| &p.value)
                .or(declared.default.as_ref());
            let key = format!("inputs.params.{}", declared.name);
            match value {
                Some(ArrayOrString::String(s)) => {
                    strings.insert(key, s.clone());
                }
                Some(ArrayOrString::Array(items)) => {
                    arrays.insert(key, items.clone());
                }
                None => {}
            }
        }

        for declared in rtr.task_spec.input_resources() {
            let path = match declared.target_path.as_deref() {
                Some(target) if !target.is_empty() => {
                    format!("/workspace/{}", target.trim_start_matches('/'))
                }
                _ => format!("/workspace/{}", declared.name),
            };
            if let Some(resource) = rtr.inputs.get(&declared.name) {
                insert_resource(&mut strings, "inputs", &declared.name, resource, path);
            }
        }
        for declared in rtr.task_spec.output_resources() {
            let path = format!("/workspace/output/{}", declared.name);
            if let Some(resource) = rtr.outputs.get(&declared.name) {
                insert_resource(&mut strings, "outputs", &declared.name, resource, path);
            }
        }

        for (name, (path, volume)) in &workspaces.paths {
            strings.insert(format!("workspaces.{name}.path"), path.clone());
            strings.insert(format!("workspaces.{name}.volume"), volume.clone());
        }

        Self { strings, arrays }
    }

    fn apply(&self, input: &str) -> String {
        if !input.contains("$(") {
            return input.to_string();
        }
        let mut out = input.to_string();
        for (key, value) in &self.strings {
            out = out.replace(&format!("$({key})"), value);
        }
        for (key, values) in &self.arrays {
            out = out.replace(&format!("$({key})"), &values.join(" "));
        }
        out
    }

    /// Like [`apply`](Self::apply), but an element that is exactly an array
    /// reference expands into one element per array item.
    fn apply_list(&self, items: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let expanded = item
                .strip_prefix("$(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|key| self.arrays.get(key));
            match expanded {
                Some(values) => out.extend(values.iter().cloned()),
                None => out.push(self.apply(item)),
            }
        }
        out
    }
}

fn insert_resource(
    strings: &mut BTreeMap<String, String>,
    direction: &str,
    binding: &str,
    resource: &ResolvedResource,
    path: String,
) {
    let prefix = format!("{direction}.resources.{binding}");
    for param in &resource.spec.params {
        strings.insert(format!("{prefix}.{}", param.name.to_lowercase()), param.value.clone());
    }
    strings.insert(format!("{prefix}.name"), resource.name.clone());
    strings.insert(format!("{prefix}.type"), resource.spec.r#type.as_str().to_string());
    strings.insert(format!("{prefix}.path"), path);
}

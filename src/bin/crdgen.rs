//! # CRD Generator
//!
//! Generates Kubernetes CustomResourceDefinition (CRD) YAML from Rust type definitions.
//!
//! Prints the `TaskRun`, `Task`, `ClusterTask` and `PipelineResource` CRDs as
//! one multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/tekton.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;
use taskrun_controller::crd::{ClusterTask, PipelineResource, Task, TaskRun};

fn crds() -> Vec<CustomResourceDefinition> {
    vec![TaskRun::crd(), Task::crd(), ClusterTask::crd(), PipelineResource::crd()]
}

fn main() {
    for crd in crds() {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}

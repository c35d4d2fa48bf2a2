//! Custom Resource Definitions for the MLflow Operator

mod mlflow_server;

pub use mlflow_server::*;

use kube::CustomResourceExt;

use crate::error::Result;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![serde_yaml::to_string(&MlflowServer::crd())?])
}

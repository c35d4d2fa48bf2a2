//! Pod defaults offered to notebook and pipeline workloads
//!
//! Clients related on `pod-defaults` receive the environment they need to
//! log runs to this tracking server and the Python packages they should
//! install.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::adapters::ObjectStorageRecord;

/// Application databag key carrying the defaults
pub const POD_DEFAULTS_KEY: &str = "pod-defaults";

/// Unit databag key carrying the requirements
pub const REQUIREMENTS_KEY: &str = "requirements";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodDefaults {
    pub minio: PodDefaultsEntry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodDefaultsEntry {
    pub env: BTreeMap<String, String>,
}

/// In-cluster URI of the tracking server
pub fn tracking_uri(app_name: &str, model_name: &str, port: i32) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        app_name, model_name, port
    )
}

/// Environment defaults for MLflow clients
pub fn pod_defaults(storage: &ObjectStorageRecord, tracking_uri: String) -> PodDefaults {
    let env = BTreeMap::from([
        ("AWS_ACCESS_KEY_ID".to_string(), storage.access_key.clone()),
        (
            "AWS_SECRET_ACCESS_KEY".to_string(),
            storage.secret_key.clone(),
        ),
        ("MLFLOW_S3_ENDPOINT_URL".to_string(), storage.endpoint()),
        ("MLFLOW_TRACKING_URI".to_string(), tracking_uri),
    ]);
    PodDefaults {
        minio: PodDefaultsEntry { env },
    }
}

/// Read the requirements file, one requirement per line
///
/// A missing or unreadable file yields an empty list.
pub fn load_requirements(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Error loading mlflow requirements file");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn storage() -> ObjectStorageRecord {
        ObjectStorageRecord {
            service: "minio".to_string(),
            namespace: "kubeflow".to_string(),
            port: "9000".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            secure: "false".to_string(),
        }
    }

    #[test]
    fn test_pod_defaults_json() {
        let defaults = pod_defaults(&storage(), tracking_uri("mlflow", "kubeflow", 5000));
        let json = serde_json::to_value(&defaults).unwrap();
        let env = &json["minio"]["env"];
        assert_eq!(env["MLFLOW_S3_ENDPOINT_URL"], "http://minio.kubeflow:9000");
        assert_eq!(
            env["MLFLOW_TRACKING_URI"],
            "http://mlflow.kubeflow.svc.cluster.local:5000"
        );
        assert_eq!(env["AWS_ACCESS_KEY_ID"], "ak");
    }

    #[test]
    fn test_load_requirements_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "mlflow==1.13.1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "boto3  ").unwrap();

        let requirements = load_requirements(file.path());
        assert_eq!(requirements, vec!["mlflow==1.13.1", "boto3"]);
    }

    #[test]
    fn test_load_requirements_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_requirements(&dir.path().join("absent.txt")).is_empty());
    }
}

//! MlflowServer Custom Resource Definition

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MlflowServer resource specification
///
/// Carries everything one reconciliation pass consumes: charm configuration,
/// the OCI image resource and the databags of every related application.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mlflow.charmed.io",
    version = "v1alpha1",
    kind = "MlflowServer",
    plural = "mlflowservers",
    singular = "mlflowserver",
    shortname = "mlf",
    namespaced,
    status = "MlflowServerStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Message", "type": "string", "jsonPath": ".status.message"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MlflowServerSpec {
    /// Charm configuration
    #[serde(default)]
    pub config: CharmConfig,

    /// OCI image resource for the workload container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<OciImageSpec>,

    /// Relations to peer applications
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Charm configuration values
///
/// Keys keep the names operators set with `juju config`-style tooling.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CharmConfig {
    /// Bucket used as the default artifact root
    #[serde(default = "default_artifact_root")]
    pub default_artifact_root: String,

    /// Port the tracking server listens on
    #[serde(default = "default_mlflow_port")]
    pub mlflow_port: i32,

    /// NodePort exposing the tracking server
    #[serde(default = "default_mlflow_nodeport")]
    pub mlflow_nodeport: i32,

    /// Port of the Kubeflow ingress gateway
    #[serde(default = "default_kubeflow_port")]
    pub kubeflow_port: i32,

    /// NodePort exposing the Kubeflow ingress gateway
    #[serde(default = "default_kubeflow_nodeport")]
    pub kubeflow_nodeport: i32,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            default_artifact_root: default_artifact_root(),
            mlflow_port: default_mlflow_port(),
            mlflow_nodeport: default_mlflow_nodeport(),
            kubeflow_port: default_kubeflow_port(),
            kubeflow_nodeport: default_kubeflow_nodeport(),
        }
    }
}

fn default_artifact_root() -> String {
    "mlflow".to_string()
}

fn default_mlflow_port() -> i32 {
    5000
}

fn default_mlflow_nodeport() -> i32 {
    31380
}

fn default_kubeflow_port() -> i32 {
    80
}

fn default_kubeflow_nodeport() -> i32 {
    31381
}

/// OCI image resource
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OciImageSpec {
    /// Registry path of the image
    pub image_path: String,

    /// Registry username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Registry password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Secret holding the registry password, preferred over `password`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<ImagePasswordSecretRef>,

    /// Pull policy (Always, IfNotPresent, Never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

/// Registry password secret reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePasswordSecretRef {
    /// Secret name
    pub name: String,
    /// Password key in secret
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// A relation between this application and a remote application
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Endpoint name (db, object-storage, ingress, pod-defaults)
    pub name: String,

    /// Relation id, unique within the model
    pub id: u32,

    /// Name of the remote application
    pub remote_app: String,

    /// Remote application databag
    #[serde(default)]
    pub app_data: BTreeMap<String, String>,

    /// Remote unit databags keyed by unit name
    #[serde(default)]
    pub units: BTreeMap<String, BTreeMap<String, String>>,
}

/// MlflowServer status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MlflowServerStatus {
    /// Unit status (Active, Waiting, Blocked)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Data this application published on its relations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relation_data: Vec<PublishedRelationData>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Local databags for one relation
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRelationData {
    /// Relation id
    pub id: u32,

    /// Application databag
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app_data: BTreeMap<String, String>,

    /// Unit databag
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_data: BTreeMap<String, String>,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

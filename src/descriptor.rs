//! Deployment descriptor submitted for the workload
//!
//! Mirrors the version 3 pod spec shape: one container plus the Kubernetes
//! resources (secrets and services) it depends on. Serializes to camelCase
//! JSON so the descriptor can be recorded or compared as submitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pod spec schema version of the descriptor
pub const DESCRIPTOR_VERSION: u32 = 3;

/// Declarative description of the workload and its resources
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    pub version: u32,
    pub containers: Vec<ContainerSpec>,
    pub kubernetes_resources: KubernetesResources,
}

/// Resolved OCI image reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image_details: ImageDetails,
    pub ports: Vec<ContainerPort>,
    pub args: Vec<String>,
    pub env_config: BTreeMap<String, EnvValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: i32,
}

/// Environment binding: either a whole secret or a literal value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Secret { secret: SecretRef },
    Literal(String),
}

impl EnvValue {
    pub fn secret(name: impl Into<String>) -> Self {
        EnvValue::Secret {
            secret: SecretRef { name: name.into() },
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        EnvValue::Literal(value.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesResources {
    pub secrets: Vec<SecretSpec>,
    pub services: Vec<ServiceSpec>,
}

/// Secret whose values are already base64 encoded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub spec: ServiceBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBody {
    #[serde(rename = "type")]
    pub type_: ServiceType,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub protocol: String,
    pub port: i32,
    pub target_port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl ServicePort {
    pub fn tcp(port: i32, node_port: Option<i32>) -> Self {
        Self {
            protocol: "TCP".to_string(),
            port,
            target_port: port,
            node_port,
        }
    }
}

impl DeploymentDescriptor {
    /// Look up a secret by name
    pub fn secret(&self, name: &str) -> Option<&SecretSpec> {
        self.kubernetes_resources
            .secrets
            .iter()
            .find(|s| s.name == name)
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.kubernetes_resources
            .services
            .iter()
            .find(|s| s.name == name)
    }
}

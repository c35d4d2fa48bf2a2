//! Applying a deployment descriptor to the cluster
//!
//! The descriptor is rendered into typed Kubernetes objects (one Secret per
//! credential bundle, the Services, and a Deployment for the workload
//! container) and applied with server-side apply. Every object is owned by
//! the `MlflowServer` resource so deleting it garbage-collects the workload.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::crd::MlflowServer;
use crate::descriptor::{ContainerSpec, DeploymentDescriptor, EnvValue};
use crate::error::{Error, Result};

use super::secrets::{docker_config, encode_secret_values, RegistryCredentials};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "mlflow-operator";

const NAME_LABEL: &str = "app.kubernetes.io/name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Name of the image pull secret for an application
pub fn pull_secret_name(app_name: &str) -> String {
    format!("{}-oci-image", app_name)
}

/// Kubernetes objects rendered from a descriptor
#[derive(Clone, Debug)]
pub struct WorkloadManifests {
    pub secrets: Vec<Secret>,
    pub services: Vec<Service>,
    pub deployment: Deployment,
}

/// Render the descriptor as Kubernetes objects
pub fn render_manifests(
    app_name: &str,
    namespace: &str,
    owner: Option<OwnerReference>,
    descriptor: &DeploymentDescriptor,
) -> Result<WorkloadManifests> {
    let metadata = |name: &str| {
        json!({
            "name": name,
            "namespace": namespace,
            "labels": {
                NAME_LABEL: app_name,
                MANAGED_BY_LABEL: FIELD_MANAGER,
            },
            "ownerReferences": owner.iter().collect::<Vec<_>>(),
        })
    };

    // Secret values are already base64 encoded, which is how `data` is
    // carried on the wire.
    let mut secrets = descriptor
        .kubernetes_resources
        .secrets
        .iter()
        .map(|secret| {
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": metadata(&secret.name),
                "type": "Opaque",
                "data": secret.data,
            }))
        })
        .collect::<std::result::Result<Vec<Secret>, _>>()?;

    let logins: Vec<RegistryCredentials> = descriptor
        .containers
        .iter()
        .filter_map(|c| {
            let image = &c.image_details;
            RegistryCredentials::for_image(
                &image.image_path,
                image.username.as_deref(),
                image.password.as_deref(),
            )
        })
        .collect();
    let pull_secret = if logins.is_empty() {
        None
    } else {
        let name = pull_secret_name(app_name);
        let secret: Secret = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": metadata(&name),
            "type": "kubernetes.io/dockerconfigjson",
            "data": encode_secret_values(&docker_config(&logins)),
        }))?;
        secrets.push(secret);
        Some(name)
    };

    let services = descriptor
        .kubernetes_resources
        .services
        .iter()
        .map(|service| {
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": metadata(&service.name),
                "spec": {
                    "type": service.spec.type_.as_str(),
                    "selector": service.spec.selector,
                    "ports": service.spec.ports,
                },
            }))
        })
        .collect::<std::result::Result<Vec<Service>, _>>()?;

    let containers = descriptor
        .containers
        .iter()
        .map(container_manifest)
        .collect::<Vec<_>>();
    if containers.is_empty() {
        return Err(Error::validation("Deployment descriptor has no containers"));
    }

    let deployment = serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(app_name),
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { NAME_LABEL: app_name } },
            "template": {
                "metadata": { "labels": { NAME_LABEL: app_name } },
                "spec": {
                    "containers": containers,
                    "imagePullSecrets": pull_secret
                        .iter()
                        .map(|name| json!({ "name": name }))
                        .collect::<Vec<_>>(),
                },
            },
        },
    }))?;

    Ok(WorkloadManifests {
        secrets,
        services,
        deployment,
    })
}

fn container_manifest(container: &ContainerSpec) -> Value {
    let mut env_from = Vec::new();
    let mut env = Vec::new();
    for (name, value) in &container.env_config {
        match value {
            EnvValue::Secret { secret } => {
                env_from.push(json!({ "secretRef": { "name": secret.name } }))
            }
            EnvValue::Literal(value) => env.push(json!({ "name": name, "value": value })),
        }
    }

    let ports: Vec<Value> = container
        .ports
        .iter()
        .map(|p| json!({ "name": p.name, "containerPort": p.container_port }))
        .collect();

    let mut manifest = json!({
        "name": container.name,
        "image": container.image_details.image_path,
        "args": container.args,
        "ports": ports,
        "env": env,
        "envFrom": env_from,
    });
    if let Some(policy) = &container.image_details.pull_policy {
        manifest["imagePullPolicy"] = json!(policy);
    }
    manifest
}

/// Apply a descriptor for the given resource
pub async fn apply_descriptor(
    client: &Client,
    server: &MlflowServer,
    descriptor: &DeploymentDescriptor,
) -> Result<()> {
    let app_name = server.name_any();
    let namespace = server
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let owner = server.controller_owner_ref(&());

    let manifests = render_manifests(&app_name, &namespace, owner, descriptor)?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    for secret in &manifests.secrets {
        let name = secret.name_any();
        secrets.patch(&name, &params, &Patch::Apply(secret)).await?;
        debug!(name = %name, "Applied secret");
    }

    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    for service in &manifests.services {
        let name = service.name_any();
        services.patch(&name, &params, &Patch::Apply(service)).await?;
        debug!(name = %name, "Applied service");
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    deployments
        .patch(&app_name, &params, &Patch::Apply(&manifests.deployment))
        .await?;

    info!(
        name = %app_name,
        namespace = %namespace,
        secrets = manifests.secrets.len(),
        services = manifests.services.len(),
        "Applied deployment descriptor"
    );
    Ok(())
}

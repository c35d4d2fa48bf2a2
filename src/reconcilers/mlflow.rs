//! MLflow server reconciler
//!
//! Turns the current configuration, relation data and image resource into
//! the deployment descriptor for the tracking server. Each check
//! short-circuits with a [`CheckFailed`]; nothing here touches the platform,
//! so the same inputs always produce the same outcome.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::adapters::{
    get_interfaces, DatabaseRecord, DatabaseSecret, ImageError, Interface, Interfaces,
    MinioCredentials, ObjectStorageRecord, RcloneCredentials, RelationSet, SecretData, INGRESS,
    OBJECT_STORAGE, REQUIRED_INTERFACES,
};
use crate::crd::CharmConfig;
use crate::descriptor::{
    ContainerPort, ContainerSpec, DeploymentDescriptor, EnvValue, ImageDetails,
    KubernetesResources, SecretSpec, ServiceBody, ServicePort, ServiceSpec, ServiceType,
    DESCRIPTOR_VERSION,
};
use crate::status::CheckFailed;

use super::bucket::validate_s3_bucket_name;

/// Endpoint of the MySQL relation
pub const DB_ENDPOINT: &str = "db";

/// Endpoints whose relations a pass reads
pub const RELATION_ENDPOINTS: [&str; 3] = [DB_ENDPOINT, "object-storage", "ingress"];

const CONTAINER_NAME: &str = "mlflow";
const DEFAULT_REGION: &str = "us-east-1";
const NAME_LABEL: &str = "app.kubernetes.io/name";
const GATEWAY_APP: &str = "istio-ingressgateway";

/// Everything one pass depends on
#[derive(Clone, Debug)]
pub struct ReconcileInputs<'a> {
    pub app_name: &'a str,
    pub leader: bool,
    pub config: &'a CharmConfig,
    pub relations: &'a RelationSet,
    pub image: Result<ImageDetails, ImageError>,
}

/// Route published to the ingress provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngressRoute {
    pub prefix: String,
    pub rewrite: String,
    pub service: String,
    pub port: i32,
}

impl IngressRoute {
    pub fn for_app(app_name: &str, port: i32) -> Self {
        Self {
            prefix: "/mlflow/".to_string(),
            rewrite: "/".to_string(),
            service: app_name.to_string(),
            port,
        }
    }
}

/// Databag entries to publish on each ingress relation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressPublication {
    pub relation_ids: Vec<u32>,
    pub data: BTreeMap<String, String>,
}

/// Successful outcome of a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciled {
    pub descriptor: DeploymentDescriptor,
    pub ingress: Option<IngressPublication>,
}

/// Run every check and assemble the descriptor
pub fn reconcile(inputs: ReconcileInputs<'_>) -> Result<Reconciled, CheckFailed> {
    check_leader(inputs.leader)?;
    let bucket = validate_s3_bucket_name(&inputs.config.default_artifact_root)?;
    let interfaces = get_interfaces(inputs.relations, &REQUIRED_INTERFACES)?;
    let image = inputs.image?;
    let database = database_record(inputs.relations)?;
    let storage = object_storage_record(&interfaces)?;

    let ingress = interfaces
        .get(INGRESS.endpoint)
        .and_then(|interface| {
            ingress_publication(interface, inputs.app_name, inputs.config.mlflow_port)
        });

    let descriptor = build_descriptor(
        inputs.app_name,
        inputs.config,
        bucket,
        image,
        &storage,
        &database,
    );

    Ok(Reconciled {
        descriptor,
        ingress,
    })
}

fn check_leader(leader: bool) -> Result<(), CheckFailed> {
    if leader {
        Ok(())
    } else {
        Err(CheckFailed::waiting("Waiting for leadership"))
    }
}

/// Connection data of the single database relation
pub fn database_record(relations: &RelationSet) -> Result<DatabaseRecord, CheckFailed> {
    let db_relations = relations
        .get(DB_ENDPOINT)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if db_relations.len() > 1 {
        return Err(CheckFailed::blocked("Too many mysql relations"));
    }

    let waiting = || CheckFailed::waiting("Waiting for mysql relation data");
    let databag = db_relations
        .first()
        .and_then(|relation| relation.units.values().next())
        .ok_or_else(waiting)?;

    DatabaseRecord::from_databag(databag).map_err(|missing| {
        debug!(field = missing, "Database relation data incomplete");
        waiting()
    })
}

/// Data of the object-storage provider
///
/// Only the first provider is used when several are related.
pub fn object_storage_record(interfaces: &Interfaces) -> Result<ObjectStorageRecord, CheckFailed> {
    let waiting = || CheckFailed::waiting("Waiting for object-storage relation data");

    let interface = interfaces.get(OBJECT_STORAGE.endpoint).ok_or_else(waiting)?;
    let published = interface.get_data()?;
    if published.len() > 1 {
        warn!(
            providers = published.len(),
            "Multiple object-storage providers related, using the first"
        );
    }

    let first = published.first().ok_or_else(waiting)?;
    ObjectStorageRecord::from_value(&first.data)
}

fn ingress_publication(
    interface: &Interface,
    app_name: &str,
    port: i32,
) -> Option<IngressPublication> {
    let route = IngressRoute::for_app(app_name, port);
    match interface.encode_data(&route) {
        Ok(data) => Some(IngressPublication {
            relation_ids: interface.relation_ids(),
            data,
        }),
        Err(e) => {
            // Best effort: the pass still succeeds without the route.
            warn!(error = %e, "Failed to encode ingress route");
            None
        }
    }
}

pub fn db_secret_name(app_name: &str) -> String {
    format!("{}-db-secret", app_name)
}

pub fn minio_secret_name(app_name: &str) -> String {
    format!("{}-minio-secret", app_name)
}

pub fn rclone_secret_name(app_name: &str) -> String {
    format!("{}-seldon-init-container-s3-credentials", app_name)
}

/// Assemble the deployment descriptor from validated inputs
pub fn build_descriptor(
    app_name: &str,
    config: &CharmConfig,
    bucket: &str,
    image: ImageDetails,
    storage: &ObjectStorageRecord,
    database: &DatabaseRecord,
) -> DeploymentDescriptor {
    let env_config = BTreeMap::from([
        (
            "db-secret".to_string(),
            EnvValue::secret(db_secret_name(app_name)),
        ),
        (
            "aws-secret".to_string(),
            EnvValue::secret(minio_secret_name(app_name)),
        ),
        (
            "AWS_DEFAULT_REGION".to_string(),
            EnvValue::literal(DEFAULT_REGION),
        ),
        (
            "MLFLOW_S3_ENDPOINT_URL".to_string(),
            EnvValue::literal(storage.endpoint()),
        ),
    ]);

    let container = ContainerSpec {
        name: CONTAINER_NAME.to_string(),
        image_details: image,
        ports: vec![ContainerPort {
            name: "http".to_string(),
            container_port: config.mlflow_port,
        }],
        args: vec![
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--backend-store-uri".to_string(),
            "$(MLFLOW_TRACKING_URI)".to_string(),
            "--default-artifact-root".to_string(),
            format!("s3://{}/", bucket),
        ],
        env_config,
    };

    let secrets = vec![
        SecretSpec {
            name: minio_secret_name(app_name),
            data: MinioCredentials::from(storage).encoded(),
        },
        SecretSpec {
            name: rclone_secret_name(app_name),
            data: RcloneCredentials::from(storage).encoded(),
        },
        SecretSpec {
            name: db_secret_name(app_name),
            data: DatabaseSecret::from(database).encoded(),
        },
    ];

    let services = vec![
        service(
            format!("{}-external", app_name),
            ServiceType::NodePort,
            app_name,
            ServicePort::tcp(config.mlflow_port, Some(config.mlflow_nodeport)),
        ),
        service(
            "kubeflow-external".to_string(),
            ServiceType::NodePort,
            GATEWAY_APP,
            ServicePort::tcp(config.kubeflow_port, Some(config.kubeflow_nodeport)),
        ),
        service(
            "kubeflow-external-lb".to_string(),
            ServiceType::LoadBalancer,
            GATEWAY_APP,
            ServicePort::tcp(config.kubeflow_port, None),
        ),
    ];

    DeploymentDescriptor {
        version: DESCRIPTOR_VERSION,
        containers: vec![container],
        kubernetes_resources: KubernetesResources { secrets, services },
    }
}

fn service(name: String, type_: ServiceType, selects: &str, port: ServicePort) -> ServiceSpec {
    ServiceSpec {
        name,
        spec: ServiceBody {
            type_,
            selector: BTreeMap::from([(NAME_LABEL.to_string(), selects.to_string())]),
            ports: vec![port],
        },
    }
}

//! Integration tests for the MLflow reconciliation pass
//!
//! These tests drive the charm handlers against an in-memory model and
//! verify the status, descriptor and relation data each pass produces.

use std::collections::BTreeMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use mlflow_operator::adapters::{
    ImageError, Model, DATA_KEY, SUPPORTED_VERSIONS_KEY,
};
use mlflow_operator::controllers::operator::{Event, Operator};
use mlflow_operator::controllers::run_pass;
use mlflow_operator::crd::{CharmConfig, MlflowServer, MlflowServerSpec, OciImageSpec, Relation};
use mlflow_operator::descriptor::{DeploymentDescriptor, EnvValue, ImageDetails};
use mlflow_operator::reconcilers::mlflow::{reconcile, ReconcileInputs};
use mlflow_operator::settings::OperatorSettings;
use mlflow_operator::status::{Severity, UnitStatus};

// ============================================================================
// Test Helpers
// ============================================================================

const APP: &str = "mlflow";

/// In-memory model recording every effect
struct FakeModel {
    leader: bool,
    config: CharmConfig,
    relations: Vec<Relation>,
    image: Result<ImageDetails, ImageError>,
    app_data_writes: Vec<(u32, BTreeMap<String, String>)>,
    unit_data_writes: Vec<(u32, BTreeMap<String, String>)>,
    specs: Vec<DeploymentDescriptor>,
    status: Option<UnitStatus>,
}

impl FakeModel {
    fn new() -> Self {
        Self {
            leader: true,
            config: CharmConfig {
                default_artifact_root: "my-bucket".to_string(),
                ..CharmConfig::default()
            },
            relations: Vec::new(),
            image: Ok(image()),
            app_data_writes: Vec::new(),
            unit_data_writes: Vec::new(),
            specs: Vec::new(),
            status: None,
        }
    }

    fn with(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }
}

impl Model for FakeModel {
    fn app_name(&self) -> &str {
        APP
    }

    fn model_name(&self) -> &str {
        "kubeflow"
    }

    fn is_leader(&self) -> bool {
        self.leader
    }

    fn config(&self) -> &CharmConfig {
        &self.config
    }

    fn relations(&self, endpoint: &str) -> Vec<Relation> {
        self.relations
            .iter()
            .filter(|r| r.name == endpoint)
            .cloned()
            .collect()
    }

    fn fetch_image(&self) -> Result<ImageDetails, ImageError> {
        self.image.clone()
    }

    fn update_app_data(&mut self, relation_id: u32, data: BTreeMap<String, String>) {
        self.app_data_writes.push((relation_id, data));
    }

    fn update_unit_data(&mut self, relation_id: u32, data: BTreeMap<String, String>) {
        self.unit_data_writes.push((relation_id, data));
    }

    fn set_spec(&mut self, spec: DeploymentDescriptor) {
        self.specs.push(spec);
    }

    fn set_status(&mut self, status: UnitStatus) {
        self.status = Some(status);
    }
}

fn image() -> ImageDetails {
    ImageDetails {
        image_path: "registry/mlflow:1.13".to_string(),
        username: None,
        password: None,
        pull_policy: Some("IfNotPresent".to_string()),
    }
}

fn databag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn db_relation(id: u32, pairs: &[(&str, &str)]) -> Relation {
    Relation {
        name: "db".to_string(),
        id,
        remote_app: "mlflow-db".to_string(),
        app_data: BTreeMap::new(),
        units: BTreeMap::from([("mlflow-db/0".to_string(), databag(pairs))]),
    }
}

fn complete_db() -> Relation {
    db_relation(
        1,
        &[
            ("root_password", "pw"),
            ("host", "h"),
            ("port", "3306"),
            ("database", "mlflow"),
        ],
    )
}

const STORAGE_DATA: &str = "service: minio\nnamespace: ns\nport: \"9000\"\naccess-key: ak\nsecret-key: sk\nsecure: \"false\"\n";

fn storage_relation(data: Option<&str>) -> Relation {
    let mut app_data = databag(&[(SUPPORTED_VERSIONS_KEY, "- v1\n")]);
    if let Some(data) = data {
        app_data.insert(DATA_KEY.to_string(), data.to_string());
    }
    Relation {
        name: "object-storage".to_string(),
        id: 2,
        remote_app: "minio".to_string(),
        app_data,
        units: BTreeMap::new(),
    }
}

fn ingress_relation() -> Relation {
    Relation {
        name: "ingress".to_string(),
        id: 3,
        remote_app: "istio-pilot".to_string(),
        app_data: databag(&[(SUPPORTED_VERSIONS_KEY, "- v1\n")]),
        units: BTreeMap::new(),
    }
}

fn ready_model() -> FakeModel {
    FakeModel::new()
        .with(complete_db())
        .with(storage_relation(Some(STORAGE_DATA)))
}

fn run(model: FakeModel, event: Event) -> FakeModel {
    let mut operator = Operator::new(model, "/nonexistent/requirements.txt");
    operator.handle(&event);
    operator.into_model()
}

fn b64(value: &str) -> String {
    BASE64_STANDARD.encode(value)
}

fn assert_status(model: &FakeModel, severity: Severity, fragment: &str) {
    let status = model.status.as_ref().expect("status should be set");
    let (actual, message) = match status {
        UnitStatus::Waiting(m) => (Severity::Waiting, m),
        UnitStatus::Blocked(m) => (Severity::Blocked, m),
        UnitStatus::Active => panic!("expected {:?}, got Active", severity),
    };
    assert_eq!(actual, severity, "unexpected status: {:?}", status);
    assert!(
        message.contains(fragment),
        "message '{}' should contain '{}'",
        message,
        fragment
    );
}

// ============================================================================
// End-to-end passes
// ============================================================================

#[test]
fn complete_relations_produce_active_descriptor() {
    let model = run(ready_model(), Event::Install);

    assert_eq!(model.status, Some(UnitStatus::Active));
    assert_eq!(model.specs.len(), 1);
    let spec = &model.specs[0];

    let container = &spec.containers[0];
    assert_eq!(container.image_details, image());
    assert_eq!(container.ports[0].container_port, 5000);
    assert_eq!(
        container.env_config["MLFLOW_S3_ENDPOINT_URL"],
        EnvValue::literal("http://minio.ns:9000")
    );
    assert_eq!(
        container.env_config["AWS_DEFAULT_REGION"],
        EnvValue::literal("us-east-1")
    );
    assert_eq!(
        container.env_config["db-secret"],
        EnvValue::secret("mlflow-db-secret")
    );
    assert_eq!(
        container.env_config["aws-secret"],
        EnvValue::secret("mlflow-minio-secret")
    );
    assert!(container.args.contains(&"s3://my-bucket/".to_string()));

    let db_secret = spec.secret("mlflow-db-secret").unwrap();
    assert_eq!(
        db_secret.data["MLFLOW_TRACKING_URI"],
        b64("mysql+pymysql://root:pw@h:3306/mlflow")
    );
    assert_eq!(db_secret.data["DB_ROOT_PASSWORD"], b64("pw"));

    let minio_secret = spec.secret("mlflow-minio-secret").unwrap();
    assert_eq!(minio_secret.data["AWS_ACCESS_KEY_ID"], b64("ak"));
    assert_eq!(minio_secret.data["USE_SSL"], b64("false"));

    let rclone = spec
        .secret("mlflow-seldon-init-container-s3-credentials")
        .unwrap();
    assert_eq!(rclone.data["RCLONE_CONFIG_S3_ENDPOINT"], b64("http://minio.ns:9000"));

    assert_eq!(spec.kubernetes_resources.services.len(), 3);
    assert!(spec.service("mlflow-external").is_some());
    assert!(spec.service("kubeflow-external").is_some());
    assert!(spec.service("kubeflow-external-lb").is_some());

    // No ingress relation, nothing published
    assert!(model.app_data_writes.is_empty());
}

#[test]
fn non_leader_waits_without_side_effects() {
    let mut model = ready_model().with(ingress_relation());
    model.leader = false;

    let model = run(model, Event::ConfigChanged);

    assert_eq!(
        model.status,
        Some(UnitStatus::Waiting("Waiting for leadership".to_string()))
    );
    assert!(model.specs.is_empty());
    assert!(model.app_data_writes.is_empty());
}

#[test]
fn ingress_route_published_once_per_pass() {
    let model = run(ready_model().with(ingress_relation()), Event::IngressRelationChanged);

    assert_eq!(model.status, Some(UnitStatus::Active));
    assert_eq!(model.app_data_writes.len(), 1);

    let (relation_id, data) = &model.app_data_writes[0];
    assert_eq!(*relation_id, 3);
    let route: serde_yaml::Value = serde_yaml::from_str(&data[DATA_KEY]).unwrap();
    assert_eq!(route["prefix"], serde_yaml::Value::from("/mlflow/"));
    assert_eq!(route["rewrite"], serde_yaml::Value::from("/"));
    assert_eq!(route["service"], serde_yaml::Value::from(APP));
    assert_eq!(route["port"], serde_yaml::Value::from(5000));
}

#[test]
fn ingress_not_published_when_checks_fail() {
    let model = FakeModel::new()
        .with(storage_relation(Some(STORAGE_DATA)))
        .with(ingress_relation());

    let model = run(model, Event::IngressRelationChanged);

    assert_status(&model, Severity::Waiting, "mysql");
    assert!(model.app_data_writes.is_empty());
}

#[test]
fn every_lifecycle_event_runs_the_main_pass() {
    for event in [
        Event::Install,
        Event::LeaderElected,
        Event::UpgradeCharm,
        Event::ConfigChanged,
        Event::DbRelationChanged,
        Event::ObjectStorageRelationChanged,
        Event::IngressRelationChanged,
    ] {
        let model = run(ready_model(), event.clone());
        assert_eq!(model.status, Some(UnitStatus::Active), "{:?}", event);
        assert_eq!(model.specs.len(), 1, "{:?}", event);
    }
}

#[test]
fn repeated_passes_produce_identical_descriptors() {
    let first = run(ready_model(), Event::ConfigChanged);
    let second = run(ready_model(), Event::ConfigChanged);
    assert_eq!(first.specs, second.specs);
}

// ============================================================================
// Failed checks
// ============================================================================

#[test]
fn invalid_bucket_is_blocked() {
    for bucket in ["ab", "192.168.1.1", "Upper", "bad_bucket"] {
        let mut model = ready_model();
        model.config.default_artifact_root = bucket.to_string();
        let model = run(model, Event::ConfigChanged);
        assert_status(&model, Severity::Blocked, bucket);
        assert!(model.specs.is_empty());
    }
}

#[test]
fn missing_database_relation_is_waiting() {
    let model = FakeModel::new().with(storage_relation(Some(STORAGE_DATA)));
    let model = run(model, Event::ConfigChanged);
    assert_status(&model, Severity::Waiting, "Waiting for mysql relation data");
}

#[test]
fn two_database_relations_are_blocked() {
    let mut second = complete_db();
    second.id = 10;
    let model = run(ready_model().with(second), Event::DbRelationChanged);
    assert_status(&model, Severity::Blocked, "Too many mysql relations");
}

#[test]
fn incomplete_database_data_is_waiting() {
    let model = FakeModel::new()
        .with(db_relation(1, &[("host", "h"), ("port", "3306")]))
        .with(storage_relation(Some(STORAGE_DATA)));
    let model = run(model, Event::DbRelationChanged);
    assert_status(&model, Severity::Waiting, "mysql");
}

#[test]
fn missing_object_storage_data_is_waiting() {
    let model = FakeModel::new()
        .with(complete_db())
        .with(storage_relation(None));
    let model = run(model, Event::ObjectStorageRelationChanged);
    assert_status(
        &model,
        Severity::Waiting,
        "Waiting for object-storage relation data",
    );

    let model = run(FakeModel::new().with(complete_db()), Event::Install);
    assert_status(
        &model,
        Severity::Waiting,
        "Waiting for object-storage relation data",
    );
}

#[test]
fn object_storage_without_versions_is_waiting() {
    let mut storage = storage_relation(Some(STORAGE_DATA));
    storage.app_data.remove(SUPPORTED_VERSIONS_KEY);
    let model = run(FakeModel::new().with(complete_db()).with(storage), Event::Install);
    assert_status(&model, Severity::Waiting, "minio");
}

#[test]
fn incompatible_ingress_version_is_blocked() {
    let mut ingress = ingress_relation();
    ingress
        .app_data
        .insert(SUPPORTED_VERSIONS_KEY.to_string(), "- v9\n".to_string());
    let model = run(ready_model().with(ingress), Event::Install);
    assert_status(&model, Severity::Blocked, "istio-pilot");
}

#[test]
fn image_failure_passes_through_severity() {
    let mut model = ready_model();
    model.image = Err(ImageError::MissingResource("oci-image".to_string()));
    let model = run(model, Event::UpgradeCharm);
    assert_status(&model, Severity::Blocked, "Missing resource: oci-image");
}

#[test]
fn leadership_checked_before_configuration() {
    let result = reconcile(ReconcileInputs {
        app_name: APP,
        leader: false,
        config: &CharmConfig {
            default_artifact_root: "x".to_string(),
            ..CharmConfig::default()
        },
        relations: &BTreeMap::new(),
        image: Err(ImageError::MissingResource("oci-image".to_string())),
    });
    let failed = result.unwrap_err();
    assert_eq!(failed.severity, Severity::Waiting);
    assert_eq!(failed.message, "Waiting for leadership");
}

// ============================================================================
// Pod defaults
// ============================================================================

fn pod_defaults_relation() -> Relation {
    Relation {
        name: "pod-defaults".to_string(),
        id: 4,
        remote_app: "admission-webhook".to_string(),
        ..Default::default()
    }
}

#[test]
fn pod_defaults_published_for_leader() {
    let model = run(
        ready_model().with(pod_defaults_relation()),
        Event::PodDefaultsRelationChanged { relation_id: 4 },
    );

    assert_eq!(model.app_data_writes.len(), 1);
    let (relation_id, data) = &model.app_data_writes[0];
    assert_eq!(*relation_id, 4);
    let defaults: serde_json::Value = serde_json::from_str(&data["pod-defaults"]).unwrap();
    let env = &defaults["minio"]["env"];
    assert_eq!(env["AWS_ACCESS_KEY_ID"], "ak");
    assert_eq!(env["AWS_SECRET_ACCESS_KEY"], "sk");
    assert_eq!(env["MLFLOW_S3_ENDPOINT_URL"], "http://minio.ns:9000");
    assert_eq!(
        env["MLFLOW_TRACKING_URI"],
        "http://mlflow.kubeflow.svc.cluster.local:5000"
    );

    // Requirements file is absent, so an empty list is published
    assert_eq!(model.unit_data_writes.len(), 1);
    assert_eq!(model.unit_data_writes[0].1["requirements"], "[]");
    assert!(model.specs.is_empty());
}

#[test]
fn pod_defaults_waits_for_object_storage() {
    let model = run(
        FakeModel::new().with(pod_defaults_relation()),
        Event::PodDefaultsRelationJoined { relation_id: 4 },
    );
    assert_status(
        &model,
        Severity::Waiting,
        "Waiting for object-storage relation data",
    );
    assert!(model.app_data_writes.is_empty());
    assert!(model.unit_data_writes.is_empty());
}

#[test]
fn pod_defaults_follower_only_publishes_requirements() {
    let mut model = ready_model().with(pod_defaults_relation());
    model.leader = false;
    let model = run(model, Event::PodDefaultsRelationChanged { relation_id: 4 });
    assert!(model.app_data_writes.is_empty());
    assert_eq!(model.unit_data_writes.len(), 1);
}

// ============================================================================
// Resource-backed passes
// ============================================================================

fn server(relations: Vec<Relation>, image: Option<OciImageSpec>) -> MlflowServer {
    MlflowServer {
        metadata: ObjectMeta {
            name: Some("tracker".to_string()),
            namespace: Some("kubeflow".to_string()),
            generation: Some(2),
            ..Default::default()
        },
        spec: MlflowServerSpec {
            config: CharmConfig::default(),
            image,
            relations,
        },
        status: None,
    }
}

fn image_spec() -> OciImageSpec {
    OciImageSpec {
        image_path: "registry/mlflow:1.13".to_string(),
        username: None,
        password: None,
        password_secret_ref: None,
        pull_policy: None,
    }
}

#[test]
fn resource_pass_produces_descriptor_and_published_data() {
    let obj = server(
        vec![
            complete_db(),
            storage_relation(Some(STORAGE_DATA)),
            ingress_relation(),
            pod_defaults_relation(),
        ],
        Some(image_spec()),
    );

    let outcome = run_pass(&obj, &OperatorSettings::default());

    assert_eq!(outcome.status, Some(UnitStatus::Active));
    let spec = outcome.spec.expect("descriptor should be produced");
    assert!(spec.service("tracker-external").is_some());
    assert!(spec.secret("tracker-db-secret").is_some());

    let ids: Vec<u32> = outcome.relation_data.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![3, 4]);
    assert!(outcome.relation_data[0].app_data.contains_key(DATA_KEY));
    assert!(outcome.relation_data[1].app_data.contains_key("pod-defaults"));
    assert!(outcome.relation_data[1].unit_data.contains_key("requirements"));
}

#[test]
fn resource_pass_without_image_is_blocked() {
    let obj = server(
        vec![complete_db(), storage_relation(Some(STORAGE_DATA))],
        None,
    );
    let outcome = run_pass(&obj, &OperatorSettings::default());
    assert_eq!(
        outcome.status,
        Some(UnitStatus::Blocked("Missing resource: oci-image".to_string()))
    );
    assert!(outcome.spec.is_none());
}

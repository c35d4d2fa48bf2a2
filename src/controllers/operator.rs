//! Charm entry points
//!
//! Each platform event has a named handler. Lifecycle and relation events
//! all run the same [`Operator::main`] pass; the mapping from platform
//! events to [`Event`] values is left to the caller.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::adapters::{get_interfaces, Model, REQUIRED_INTERFACES};
use crate::reconcilers::mlflow::{self, ReconcileInputs, Reconciled, RELATION_ENDPOINTS};
use crate::reconcilers::pod_defaults::{
    self, load_requirements, POD_DEFAULTS_KEY, REQUIREMENTS_KEY,
};
use crate::status::{CheckFailed, UnitStatus};

/// Endpoint of the pod-defaults relation
pub const POD_DEFAULTS_ENDPOINT: &str = "pod-defaults";

/// Platform events the operator reacts to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Install,
    LeaderElected,
    UpgradeCharm,
    ConfigChanged,
    DbRelationChanged,
    ObjectStorageRelationChanged,
    IngressRelationChanged,
    PodDefaultsRelationJoined { relation_id: u32 },
    PodDefaultsRelationChanged { relation_id: u32 },
}

/// The charm, driving a [`Model`]
pub struct Operator<M: Model> {
    model: M,
    requirements_path: PathBuf,
}

impl<M: Model> Operator<M> {
    pub fn new(model: M, requirements_path: impl Into<PathBuf>) -> Self {
        Self {
            model,
            requirements_path: requirements_path.into(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Dispatch an event to its handler
    pub fn handle(&mut self, event: &Event) {
        match event {
            Event::Install => self.on_install(),
            Event::LeaderElected => self.on_leader_elected(),
            Event::UpgradeCharm => self.on_upgrade_charm(),
            Event::ConfigChanged => self.on_config_changed(),
            Event::DbRelationChanged => self.on_db_relation_changed(),
            Event::ObjectStorageRelationChanged => self.on_object_storage_relation_changed(),
            Event::IngressRelationChanged => self.on_ingress_relation_changed(),
            Event::PodDefaultsRelationJoined { relation_id } => {
                self.on_pod_defaults_relation_joined(*relation_id)
            }
            Event::PodDefaultsRelationChanged { relation_id } => {
                self.on_pod_defaults_relation_changed(*relation_id)
            }
        }
    }

    pub fn on_install(&mut self) {
        self.main();
    }

    pub fn on_leader_elected(&mut self) {
        self.main();
    }

    pub fn on_upgrade_charm(&mut self) {
        self.main();
    }

    pub fn on_config_changed(&mut self) {
        self.main();
    }

    pub fn on_db_relation_changed(&mut self) {
        self.main();
    }

    pub fn on_object_storage_relation_changed(&mut self) {
        self.main();
    }

    pub fn on_ingress_relation_changed(&mut self) {
        self.main();
    }

    pub fn on_pod_defaults_relation_joined(&mut self, relation_id: u32) {
        self.publish_pod_defaults(relation_id);
    }

    pub fn on_pod_defaults_relation_changed(&mut self, relation_id: u32) {
        self.publish_pod_defaults(relation_id);
    }

    /// One reconciliation pass
    ///
    /// Publishes the ingress route, submits the pod spec and reports the
    /// unit status. A failed check only updates the status.
    pub fn main(&mut self) {
        let relations = self.model.relation_set(&RELATION_ENDPOINTS);
        let outcome = mlflow::reconcile(ReconcileInputs {
            app_name: self.model.app_name(),
            leader: self.model.is_leader(),
            config: self.model.config(),
            relations: &relations,
            image: self.model.fetch_image(),
        });

        match outcome {
            Ok(Reconciled {
                descriptor,
                ingress,
            }) => {
                if let Some(ingress) = ingress {
                    for relation_id in &ingress.relation_ids {
                        self.model
                            .update_app_data(*relation_id, ingress.data.clone());
                    }
                }
                info!(app = %self.model.app_name(), "Setting pod spec");
                self.model.set_spec(descriptor);
                self.model.set_status(UnitStatus::Active);
            }
            Err(failed) => {
                info!(
                    severity = %failed.severity,
                    message = %failed.message,
                    "Reconciliation check failed"
                );
                self.model.set_status(failed.into());
            }
        }
    }

    fn publish_pod_defaults(&mut self, relation_id: u32) {
        if let Err(failed) = self.try_publish_pod_defaults(relation_id) {
            self.model.set_status(failed.into());
        }
    }

    fn try_publish_pod_defaults(&mut self, relation_id: u32) -> Result<(), CheckFailed> {
        let relations = self.model.relation_set(&RELATION_ENDPOINTS);
        let interfaces = get_interfaces(&relations, &REQUIRED_INTERFACES)?;
        let storage = mlflow::object_storage_record(&interfaces)?;

        if self.model.is_leader() {
            let tracking_uri = pod_defaults::tracking_uri(
                self.model.app_name(),
                self.model.model_name(),
                self.model.config().mlflow_port,
            );
            let defaults = pod_defaults::pod_defaults(&storage, tracking_uri);
            match serde_json::to_string(&defaults) {
                Ok(json) => self.model.update_app_data(
                    relation_id,
                    [(POD_DEFAULTS_KEY.to_string(), json)].into(),
                ),
                Err(e) => warn!(error = %e, "Failed to encode pod defaults"),
            }
        }

        let requirements = load_requirements(&self.requirements_path);
        match serde_json::to_string(&requirements) {
            Ok(json) => self
                .model
                .update_unit_data(relation_id, [(REQUIREMENTS_KEY.to_string(), json)].into()),
            Err(e) => warn!(error = %e, "Failed to encode requirements"),
        }

        Ok(())
    }
}

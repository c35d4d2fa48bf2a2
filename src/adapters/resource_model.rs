//! [`Model`] backed by an `MlflowServer` resource
//!
//! Reads come from the resource spec. Effects are buffered so the async
//! controller can apply them to the cluster after the synchronous pass.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::{CharmConfig, MlflowServer, OciImageSpec, PublishedRelationData, Relation};
use crate::descriptor::{DeploymentDescriptor, ImageDetails};
use crate::status::UnitStatus;

use super::image::{self, ImageError};
use super::model::Model;

/// Effects recorded during one pass
#[derive(Clone, Debug, Default)]
pub struct PassOutcome {
    pub spec: Option<DeploymentDescriptor>,
    pub status: Option<UnitStatus>,
    pub relation_data: Vec<PublishedRelationData>,
}

/// Model over a snapshot of an `MlflowServer` resource
#[derive(Clone, Debug)]
pub struct ResourceModel {
    app_name: String,
    model_name: String,
    leader: bool,
    config: CharmConfig,
    image: Option<OciImageSpec>,
    relations: Vec<Relation>,
    published: BTreeMap<u32, PublishedRelationData>,
    spec: Option<DeploymentDescriptor>,
    status: Option<UnitStatus>,
}

impl ResourceModel {
    /// Snapshot a resource
    ///
    /// Data published on earlier passes is carried over so a pass that
    /// publishes nothing does not wipe it.
    pub fn new(server: &MlflowServer, leader: bool) -> Self {
        let mut relations = server.spec.relations.clone();
        relations.sort_by_key(|r| r.id);

        let published = server
            .status
            .as_ref()
            .map(|status| {
                status
                    .relation_data
                    .iter()
                    .filter(|data| relations.iter().any(|r| r.id == data.id))
                    .map(|data| (data.id, data.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            app_name: server.name_any(),
            model_name: server.namespace().unwrap_or_else(|| "default".to_string()),
            leader,
            config: server.spec.config.clone(),
            image: server.spec.image.clone(),
            relations,
            published,
            spec: None,
            status: None,
        }
    }

    /// Consume the model, returning what the pass did
    pub fn into_outcome(self) -> PassOutcome {
        PassOutcome {
            spec: self.spec,
            status: self.status,
            relation_data: self.published.into_values().collect(),
        }
    }

    fn published_mut(&mut self, relation_id: u32) -> &mut PublishedRelationData {
        self.published
            .entry(relation_id)
            .or_insert_with(|| PublishedRelationData {
                id: relation_id,
                ..Default::default()
            })
    }
}

impl Model for ResourceModel {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn model_name(&self) -> &str {
        &self.model_name
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
        image::fetch(self.image.as_ref())
    }

    fn update_app_data(&mut self, relation_id: u32, data: BTreeMap<String, String>) {
        self.published_mut(relation_id).app_data.extend(data);
    }

    fn update_unit_data(&mut self, relation_id: u32, data: BTreeMap<String, String>) {
        self.published_mut(relation_id).unit_data.extend(data);
    }

    fn set_spec(&mut self, spec: DeploymentDescriptor) {
        self.spec = Some(spec);
    }

    fn set_status(&mut self, status: UnitStatus) {
        self.status = Some(status);
    }
}

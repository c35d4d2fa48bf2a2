//! Platform collaborators the operator talks to
//!
//! The reconciler never reaches into the platform directly; everything it
//! reads (leadership, configuration, relations, the image resource) and
//! every effect it has (relation data, the pod spec, the unit status) goes
//! through [`Model`].

use std::collections::BTreeMap;

use crate::crd::{CharmConfig, Relation};
use crate::descriptor::{DeploymentDescriptor, ImageDetails};
use crate::status::UnitStatus;

use super::image::ImageError;

/// Relations grouped by endpoint name
pub type RelationSet = BTreeMap<String, Vec<Relation>>;

/// View of the platform for one unit of the application
pub trait Model {
    /// Application name, used to name secrets and services
    fn app_name(&self) -> &str;

    /// Model (namespace) the application is deployed in
    fn model_name(&self) -> &str;

    fn is_leader(&self) -> bool;

    fn config(&self) -> &CharmConfig;

    /// All relations on an endpoint, ordered by relation id
    fn relations(&self, endpoint: &str) -> Vec<Relation>;

    fn fetch_image(&self) -> Result<ImageDetails, ImageError>;

    /// Merge entries into this application's databag on a relation
    fn update_app_data(&mut self, relation_id: u32, data: BTreeMap<String, String>);

    /// Merge entries into this unit's databag on a relation
    fn update_unit_data(&mut self, relation_id: u32, data: BTreeMap<String, String>);

    /// Submit the pod spec
    fn set_spec(&mut self, spec: DeploymentDescriptor);

    fn set_status(&mut self, status: UnitStatus);

    /// Collect the relations of several endpoints
    fn relation_set(&self, endpoints: &[&str]) -> RelationSet {
        endpoints
            .iter()
            .map(|endpoint| (endpoint.to_string(), self.relations(endpoint)))
            .collect()
    }
}

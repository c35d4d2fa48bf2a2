//! Versioned relation interfaces
//!
//! Peers on a versioned interface advertise the schema versions they speak
//! under `_supported_versions` (a YAML list) in their application databag
//! and publish their payload as a YAML document under `data`. Negotiation
//! picks the highest version both sides support.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::crd::Relation;
use crate::status::CheckFailed;

use super::model::RelationSet;

/// Databag key listing supported schema versions
pub const SUPPORTED_VERSIONS_KEY: &str = "_supported_versions";

/// Databag key holding the YAML payload
pub const DATA_KEY: &str = "data";

/// A versioned interface this application requires
#[derive(Clone, Copy, Debug)]
pub struct InterfaceSchema {
    pub endpoint: &'static str,
    pub versions: &'static [&'static str],
}

pub const OBJECT_STORAGE: InterfaceSchema = InterfaceSchema {
    endpoint: "object-storage",
    versions: &["v1"],
};

pub const INGRESS: InterfaceSchema = InterfaceSchema {
    endpoint: "ingress",
    versions: &["v1"],
};

/// Interfaces negotiated on every pass
pub const REQUIRED_INTERFACES: [InterfaceSchema; 2] = [OBJECT_STORAGE, INGRESS];

/// Interface negotiation errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    /// A remote application has not advertised any versions yet
    #[error("List of versions not found for apps: {}", apps.join(", "))]
    NoVersionsListed { endpoint: String, apps: Vec<String> },

    /// No version is supported by both sides
    #[error("No compatible versions found for apps: {}", apps.join(", "))]
    NoCompatibleVersions { endpoint: String, apps: Vec<String> },

    /// The advertised version list is not a YAML list of strings
    #[error("Invalid supported versions published by {app}: {source}")]
    InvalidVersions {
        app: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The published payload is not valid YAML
    #[error("Unexpected error unpacking {endpoint} data from {app}: {source}")]
    InvalidData {
        endpoint: String,
        app: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl From<InterfaceError> for CheckFailed {
    fn from(err: InterfaceError) -> Self {
        match err {
            InterfaceError::NoVersionsListed { .. } => CheckFailed::waiting(err.to_string()),
            _ => CheckFailed::blocked(err.to_string()),
        }
    }
}

/// Payload published by one remote application
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteData {
    pub relation_id: u32,
    pub app: String,
    pub data: serde_yaml::Value,
}

/// A negotiated interface over all relations of one endpoint
#[derive(Clone, Debug)]
pub struct Interface {
    pub endpoint: String,
    pub version: String,
    versions: Vec<String>,
    relations: Vec<Relation>,
}

impl Interface {
    /// Payloads published by remote applications, ordered by relation id
    ///
    /// Applications that have not published a payload yet are skipped.
    pub fn get_data(&self) -> Result<Vec<RemoteData>, InterfaceError> {
        self.relations
            .iter()
            .filter_map(|relation| {
                relation.app_data.get(DATA_KEY).map(|raw| {
                    serde_yaml::from_str(raw)
                        .map(|data| RemoteData {
                            relation_id: relation.id,
                            app: relation.remote_app.clone(),
                            data,
                        })
                        .map_err(|source| InterfaceError::InvalidData {
                            endpoint: self.endpoint.clone(),
                            app: relation.remote_app.clone(),
                            source,
                        })
                })
            })
            .collect()
    }

    /// Render a payload as the local application databag entries
    pub fn encode_data<T: Serialize>(
        &self,
        data: &T,
    ) -> Result<BTreeMap<String, String>, serde_yaml::Error> {
        Ok(BTreeMap::from([
            (
                SUPPORTED_VERSIONS_KEY.to_string(),
                serde_yaml::to_string(&self.versions)?,
            ),
            (DATA_KEY.to_string(), serde_yaml::to_string(data)?),
        ]))
    }

    pub fn relation_ids(&self) -> Vec<u32> {
        self.relations.iter().map(|r| r.id).collect()
    }
}

/// Result of negotiating every required interface
#[derive(Clone, Debug, Default)]
pub struct Interfaces {
    negotiated: BTreeMap<String, Interface>,
}

impl Interfaces {
    /// The negotiated interface for an endpoint, if any relation exists
    pub fn get(&self, endpoint: &str) -> Option<&Interface> {
        self.negotiated.get(endpoint)
    }
}

/// Negotiate a version for each schema against the current relations
pub fn get_interfaces(
    relations: &RelationSet,
    schemas: &[InterfaceSchema],
) -> Result<Interfaces, InterfaceError> {
    let mut negotiated = BTreeMap::new();
    for schema in schemas {
        let related = relations
            .get(schema.endpoint)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if let Some(interface) = negotiate(schema, related)? {
            negotiated.insert(schema.endpoint.to_string(), interface);
        }
    }
    Ok(Interfaces { negotiated })
}

fn negotiate(
    schema: &InterfaceSchema,
    relations: &[Relation],
) -> Result<Option<Interface>, InterfaceError> {
    if relations.is_empty() {
        return Ok(None);
    }

    let ours: Vec<String> = schema.versions.iter().map(|v| v.to_string()).collect();

    let unlisted: Vec<String> = relations
        .iter()
        .filter(|r| !r.app_data.contains_key(SUPPORTED_VERSIONS_KEY))
        .map(|r| r.remote_app.clone())
        .collect();
    if !unlisted.is_empty() {
        return Err(InterfaceError::NoVersionsListed {
            endpoint: schema.endpoint.to_string(),
            apps: unlisted,
        });
    }

    let mut common = ours.clone();
    let mut incompatible = Vec::new();
    for relation in relations {
        let raw = relation
            .app_data
            .get(SUPPORTED_VERSIONS_KEY)
            .map(String::as_str)
            .unwrap_or_default();
        let theirs: Vec<String> =
            serde_yaml::from_str(raw).map_err(|source| InterfaceError::InvalidVersions {
                app: relation.remote_app.clone(),
                source,
            })?;
        if !theirs.iter().any(|v| ours.contains(v)) {
            incompatible.push(relation.remote_app.clone());
        }
        common.retain(|v| theirs.contains(v));
    }

    if !incompatible.is_empty() || common.is_empty() {
        if incompatible.is_empty() {
            incompatible = relations.iter().map(|r| r.remote_app.clone()).collect();
        }
        return Err(InterfaceError::NoCompatibleVersions {
            endpoint: schema.endpoint.to_string(),
            apps: incompatible,
        });
    }

    // v10 sorts after v9
    let version = common
        .into_iter()
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
        .unwrap_or_default();

    Ok(Some(Interface {
        endpoint: schema.endpoint.to_string(),
        version,
        versions: ours,
        relations: relations.to_vec(),
    }))
}

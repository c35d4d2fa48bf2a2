//! Typed relation records
//!
//! Relation databags are untyped string maps (or YAML documents for
//! versioned interfaces). The reconciler only ever reads them through these
//! records so a missing field is reported as "not ready yet" instead of a
//! lookup failure deep in descriptor assembly.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::status::CheckFailed;

/// Data published by an object-storage provider (e.g. minio)
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ObjectStorageRecord {
    #[serde(deserialize_with = "scalar_string")]
    pub service: String,

    #[serde(deserialize_with = "scalar_string")]
    pub namespace: String,

    #[serde(deserialize_with = "scalar_string")]
    pub port: String,

    #[serde(rename = "access-key", deserialize_with = "scalar_string")]
    pub access_key: String,

    #[serde(rename = "secret-key", deserialize_with = "scalar_string")]
    pub secret_key: String,

    #[serde(deserialize_with = "scalar_string")]
    pub secure: String,
}

impl ObjectStorageRecord {
    /// Decode a record from the YAML document the provider published
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self, CheckFailed> {
        if !value.is_mapping() {
            return Err(CheckFailed::blocked(
                "Unexpected error unpacking object storage data - data format not as expected",
            ));
        }

        serde_yaml::from_value(value.clone()).map_err(|e| {
            CheckFailed::waiting(format!("Waiting for object-storage relation data: {}", e))
        })
    }

    /// In-cluster endpoint of the object storage service
    pub fn endpoint(&self) -> String {
        format!("http://{}.{}:{}", self.service, self.namespace, self.port)
    }

    /// Whether clients should use TLS, as a lowercase "true"/"false"
    pub fn use_ssl(&self) -> String {
        self.secure.to_lowercase()
    }
}

/// Accept strings, numbers and booleans where a string is expected
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar value, got {:?}",
            other
        ))),
    }
}

/// Connection data published by a MySQL-compatible database unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub root_password: String,
    pub host: String,
    pub port: String,
    pub database: String,
}

impl DatabaseRecord {
    const REQUIRED_FIELDS: [&'static str; 4] = ["root_password", "host", "port", "database"];

    /// Read a record from a unit databag
    ///
    /// Returns the name of the first missing field when the unit has not
    /// published everything yet.
    pub fn from_databag(databag: &BTreeMap<String, String>) -> Result<Self, &'static str> {
        if let Some(missing) = Self::REQUIRED_FIELDS
            .iter()
            .find(|field| !databag.contains_key(**field))
        {
            return Err(*missing);
        }

        let field = |key: &str| databag.get(key).cloned().unwrap_or_default();
        Ok(Self {
            root_password: field("root_password"),
            host: field("host"),
            port: field("port"),
            database: field("database"),
        })
    }

    /// SQLAlchemy connection string used as the backend store URI
    pub fn connection_uri(&self) -> String {
        format!(
            "mysql+pymysql://root:{}@{}:{}/{}",
            self.root_password, self.host, self.port, self.database
        )
    }
}

//! Credential bundles stored as Kubernetes secrets
//!
//! Each bundle is a fixed-shape struct that knows its own key names. Values
//! are base64 encoded on the way into the descriptor, matching how secret
//! data is stored by the API server.

use std::collections::BTreeMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde_json::json;

use crate::crd::OciImageSpec;
use crate::error::{Error, Result};

use super::records::{DatabaseRecord, ObjectStorageRecord};

/// Registry assumed for image paths without a registry host
const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";

/// Key of the docker config in a `kubernetes.io/dockerconfigjson` secret
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// A credential bundle that can be rendered as secret data
pub trait SecretData {
    /// Plain-text key/value pairs
    fn entries(&self) -> BTreeMap<String, String>;

    /// Key/value pairs with base64 encoded values
    fn encoded(&self) -> BTreeMap<String, String> {
        encode_secret_values(&self.entries())
    }
}

/// Base64 encode every value of a mapping
pub fn encode_secret_values(data: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| (k.clone(), BASE64_STANDARD.encode(v.as_bytes())))
        .collect()
}

/// Object-storage credentials in the AWS client convention
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinioCredentials {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_ssl: String,
}

impl From<&ObjectStorageRecord> for MinioCredentials {
    fn from(storage: &ObjectStorageRecord) -> Self {
        Self {
            endpoint_url: storage.endpoint(),
            access_key_id: storage.access_key.clone(),
            secret_access_key: storage.secret_key.clone(),
            use_ssl: storage.use_ssl(),
        }
    }
}

impl SecretData for MinioCredentials {
    fn entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("AWS_ENDPOINT_URL".to_string(), self.endpoint_url.clone()),
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            (
                "AWS_SECRET_ACCESS_KEY".to_string(),
                self.secret_access_key.clone(),
            ),
            ("USE_SSL".to_string(), self.use_ssl.clone()),
        ])
    }
}

/// The same object-storage credentials in the rclone convention, used by
/// Seldon model initializer containers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RcloneCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl From<&ObjectStorageRecord> for RcloneCredentials {
    fn from(storage: &ObjectStorageRecord) -> Self {
        Self {
            // Namespaced like AWS_ENDPOINT_URL, not the bare service name
            endpoint: storage.endpoint(),
            access_key_id: storage.access_key.clone(),
            secret_access_key: storage.secret_key.clone(),
        }
    }
}

impl SecretData for RcloneCredentials {
    fn entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("RCLONE_CONFIG_S3_TYPE".to_string(), "s3".to_string()),
            ("RCLONE_CONFIG_S3_PROVIDER".to_string(), "minio".to_string()),
            (
                "RCLONE_CONFIG_S3_ACCESS_KEY_ID".to_string(),
                self.access_key_id.clone(),
            ),
            (
                "RCLONE_CONFIG_S3_SECRET_ACCESS_KEY".to_string(),
                self.secret_access_key.clone(),
            ),
            ("RCLONE_CONFIG_S3_ENDPOINT".to_string(), self.endpoint.clone()),
            ("RCLONE_CONFIG_S3_ENV_AUTH".to_string(), "false".to_string()),
        ])
    }
}

/// Backend store credentials
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseSecret {
    pub root_password: String,
    pub tracking_uri: String,
}

impl From<&DatabaseRecord> for DatabaseSecret {
    fn from(db: &DatabaseRecord) -> Self {
        Self {
            root_password: db.root_password.clone(),
            tracking_uri: db.connection_uri(),
        }
    }
}

impl SecretData for DatabaseSecret {
    fn entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("DB_ROOT_PASSWORD".to_string(), self.root_password.clone()),
            ("MLFLOW_TRACKING_URI".to_string(), self.tracking_uri.clone()),
        ])
    }
}

/// Image registry login rendered as a docker config
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    /// Credentials for pulling `image_path`, if a login is configured
    pub fn for_image(
        image_path: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Option<Self> {
        Some(Self {
            registry: registry_host(image_path).to_string(),
            username: username?.to_string(),
            password: password?.to_string(),
        })
    }
}

impl SecretData for RegistryCredentials {
    fn entries(&self) -> BTreeMap<String, String> {
        docker_config(std::slice::from_ref(self))
    }
}

/// Docker config entries holding every registry login
pub fn docker_config(logins: &[RegistryCredentials]) -> BTreeMap<String, String> {
    let auths: serde_json::Map<String, serde_json::Value> = logins
        .iter()
        .map(|login| {
            let auth = BASE64_STANDARD.encode(format!("{}:{}", login.username, login.password));
            (
                login.registry.clone(),
                json!({
                    "username": login.username,
                    "password": login.password,
                    "auth": auth,
                }),
            )
        })
        .collect();
    let config = json!({ "auths": auths });
    BTreeMap::from([(DOCKER_CONFIG_KEY.to_string(), config.to_string())])
}

/// Registry host of an image path
///
/// The first path segment names a registry when it looks like a host
/// (`registry.example.com/app`, `localhost:5000/app`).
fn registry_host(image_path: &str) -> &str {
    match image_path.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => DEFAULT_REGISTRY,
    }
}

/// Fetch a secret from Kubernetes
pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets.get(name).await.map_err(|e| match e {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            Error::SecretNotFound(format!("{}/{}", namespace, name))
        }
        other => Error::Kube(other),
    })
}

/// Get a string value from a secret
pub fn get_secret_string(secret: &Secret, key: &str) -> Result<String> {
    let missing = || Error::SecretKeyNotFound {
        secret: secret.metadata.name.clone().unwrap_or_default(),
        key: key.to_string(),
    };

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(missing)?;

    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::config(format!("Invalid UTF-8 in secret key '{}': {}", key, e)))
}

/// Resolve the registry password of an image resource
///
/// A `passwordSecretRef` takes precedence over an inline password.
pub async fn resolve_image_password(
    client: &Client,
    namespace: &str,
    image: Option<&OciImageSpec>,
) -> Result<Option<OciImageSpec>> {
    let Some(image) = image else {
        return Ok(None);
    };
    let Some(secret_ref) = &image.password_secret_ref else {
        return Ok(Some(image.clone()));
    };

    let secret = get_secret(client, &secret_ref.name, namespace).await?;
    let password = get_secret_string(&secret, &secret_ref.key)?;
    Ok(Some(with_password(image, password)))
}

fn with_password(image: &OciImageSpec, password: String) -> OciImageSpec {
    OciImageSpec {
        password: Some(password),
        ..image.clone()
    }
}

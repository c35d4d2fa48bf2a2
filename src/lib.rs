//! MLflow Kubernetes Operator
//!
//! This operator deploys and reconfigures an MLflow tracking server from
//! its configuration and the state of its relations (database, object
//! storage, ingress), declared on an `MlflowServer` custom resource.

pub mod adapters;
pub mod controllers;
pub mod crd;
pub mod descriptor;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod settings;
pub mod status;

pub use error::{Error, Result};

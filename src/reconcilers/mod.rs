//! Reconcilers for the MLflow tracking server
//!
//! This module contains the business logic of a reconciliation pass:
//! - Validating configuration
//! - Reading relation data into typed records
//! - Assembling the deployment descriptor and pod defaults

pub mod bucket;
pub mod mlflow;
pub mod pod_defaults;

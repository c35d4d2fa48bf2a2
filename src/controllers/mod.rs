//! Controller and charm entry points for MlflowServer resources
//!
//! `operator` holds the synchronous charm handlers; `mlflow_controller`
//! watches the custom resource and drives them.

mod mlflow_controller;
pub mod operator;

pub use mlflow_controller::run as run_mlflow_controller;
pub use mlflow_controller::{requeue_for, run_pass};

use kube::Client;

use crate::settings::OperatorSettings;

/// Shared context for the controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator process settings
    pub settings: OperatorSettings,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, settings: OperatorSettings) -> Self {
        Self { client, settings }
    }
}

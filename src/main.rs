//! MLflow Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! registers the MlflowServer controller, and runs the reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mlflow_operator::{
    controllers::{self, Context},
    metrics,
    settings::OperatorSettings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting MLflow Operator");

    let settings = OperatorSettings::from_env()?;
    info!(
        leader = settings.leader,
        requirements = %settings.requirements_path.display(),
        "Loaded operator settings"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let metrics_port = settings.metrics_port;
    let context = Arc::new(Context::new(client.clone(), settings));

    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let mlflow_controller = controllers::run_mlflow_controller(client, context);

    tokio::select! {
        _ = mlflow_controller => {
            error!("MlflowServer controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        result = shutdown_signal() => {
            result?;
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("MLflow Operator stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
    Ok(())
}

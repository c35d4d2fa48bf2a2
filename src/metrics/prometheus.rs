//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::status::UnitStatus;

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "mlflow_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "mlflow_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "mlflow_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Failed checks by severity
    pub static ref CHECK_FAILURES: CounterVec = register_counter_vec!(
        "mlflow_operator_check_failures_total",
        "Total number of reconciliation passes stopped by a failed check",
        &["severity", "namespace", "name"]
    ).unwrap();

    /// Current unit status (1 for the phase the unit is in, 0 otherwise)
    pub static ref UNIT_STATUS: GaugeVec = register_gauge_vec!(
        "mlflow_operator_unit_status",
        "Current unit status by phase",
        &["phase", "namespace", "name"]
    ).unwrap();

    /// Deployment descriptors applied to the cluster
    pub static ref DESCRIPTORS_APPLIED: CounterVec = register_counter_vec!(
        "mlflow_operator_descriptors_applied_total",
        "Total number of deployment descriptors applied",
        &["namespace", "name"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "mlflow_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

const PHASES: [&str; 3] = ["Active", "Waiting", "Blocked"];

/// Record the status a pass ended with
pub fn record_unit_status(namespace: &str, name: &str, status: &UnitStatus) {
    for phase in PHASES {
        let value = if phase == status.phase() { 1.0 } else { 0.0 };
        UNIT_STATUS
            .with_label_values(&[phase, namespace, name])
            .set(value);
    }

    if !status.is_active() {
        CHECK_FAILURES
            .with_label_values(&[status.phase(), namespace, name])
            .inc();
    }
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => {
            plain_response(StatusCode::OK, Bytes::from_static(b"ok"))
        }
        _ => plain_response(StatusCode::NOT_FOUND, Bytes::from_static(b"Not Found")),
    };

    Ok(response)
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from_static(b"Failed to encode metrics"),
        );
    }

    let mut response = plain_response(StatusCode::OK, Bytes::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn plain_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

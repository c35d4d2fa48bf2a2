//! Prometheus metrics for the MLflow Operator
//!
//! This module exposes metrics for monitoring operator health and the
//! status of managed tracking servers.

mod prometheus;

pub use prometheus::*;

//! Operator process settings
//!
//! Charm configuration lives on each `MlflowServer` resource; these settings
//! cover the operator process itself and are read from the environment.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Environment variable overriding the metrics server port
const METRICS_PORT_ENV: &str = "METRICS_PORT";

/// Environment variable marking this replica as leader
const LEADER_ENV: &str = "MLFLOW_OPERATOR_LEADER";

/// Environment variable with the path of the requirements file
const REQUIREMENTS_PATH_ENV: &str = "MLFLOW_REQUIREMENTS_PATH";

/// Default metrics port
const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default requirements file shipped with the operator image
const DEFAULT_REQUIREMENTS_PATH: &str = "files/mlflow_requirements.txt";

/// Settings of the operator process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSettings {
    pub metrics_port: u16,
    pub leader: bool,
    pub requirements_path: PathBuf,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            leader: true,
            requirements_path: PathBuf::from(DEFAULT_REQUIREMENTS_PATH),
        }
    }
}

impl OperatorSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let metrics_port = match lookup(METRICS_PORT_ENV) {
            Some(raw) => raw.parse().map_err(|e| {
                Error::config(format!("Invalid {} '{}': {}", METRICS_PORT_ENV, raw, e))
            })?,
            None => defaults.metrics_port,
        };

        let leader = match lookup(LEADER_ENV) {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                Error::config(format!(
                    "Invalid {} '{}': must be true or false",
                    LEADER_ENV, raw
                ))
            })?,
            None => defaults.leader,
        };

        let requirements_path = lookup(REQUIREMENTS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.requirements_path);

        Ok(Self {
            metrics_port,
            leader,
            requirements_path,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = OperatorSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, OperatorSettings::default());
    }

    #[test]
    fn test_overrides() {
        let settings = OperatorSettings::from_lookup(lookup(&[
            ("METRICS_PORT", "9090"),
            ("MLFLOW_OPERATOR_LEADER", "False"),
            ("MLFLOW_REQUIREMENTS_PATH", "/etc/mlflow/requirements.txt"),
        ]))
        .unwrap();
        assert_eq!(settings.metrics_port, 9090);
        assert!(!settings.leader);
        assert_eq!(
            settings.requirements_path,
            PathBuf::from("/etc/mlflow/requirements.txt")
        );
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = OperatorSettings::from_lookup(lookup(&[("METRICS_PORT", "http")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = OperatorSettings::from_lookup(lookup(&[("MLFLOW_OPERATOR_LEADER", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("MLFLOW_OPERATOR_LEADER"));
    }
}

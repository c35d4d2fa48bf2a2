//! Unit status and check failures
//!
//! Every precondition the operator checks either passes or produces a
//! [`CheckFailed`] carrying a [`Severity`] and a human-readable message.
//! The severity tells the platform whether to wait for re-invocation
//! (`Waiting`) or to surface the problem to an operator (`Blocked`).

use std::fmt;

use thiserror::Error;

/// Severity of a failed check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Expected to resolve on its own once a peer publishes data
    Waiting,
    /// Needs operator intervention
    Blocked,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Waiting => "Waiting",
            Severity::Blocked => "Blocked",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed reconciliation check
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{severity}: {message}")]
pub struct CheckFailed {
    pub severity: Severity,
    pub message: String,
}

impl CheckFailed {
    pub fn waiting(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Waiting,
            message: msg.into(),
        }
    }

    pub fn blocked(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Blocked,
            message: msg.into(),
        }
    }
}

/// Status reported for the unit after a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitStatus {
    Active,
    Waiting(String),
    Blocked(String),
}

impl UnitStatus {
    /// Phase name written to the resource status
    pub fn phase(&self) -> &'static str {
        match self {
            UnitStatus::Active => "Active",
            UnitStatus::Waiting(_) => "Waiting",
            UnitStatus::Blocked(_) => "Blocked",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active => "",
            UnitStatus::Waiting(msg) | UnitStatus::Blocked(msg) => msg,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active)
    }
}

impl From<CheckFailed> for UnitStatus {
    fn from(failed: CheckFailed) -> Self {
        match failed.severity {
            Severity::Waiting => UnitStatus::Waiting(failed.message),
            Severity::Blocked => UnitStatus::Blocked(failed.message),
        }
    }
}

//! OCI image resource resolution

use thiserror::Error;

use crate::crd::OciImageSpec;
use crate::descriptor::ImageDetails;
use crate::status::{CheckFailed, Severity};

/// Name of the image resource the workload container runs
pub const IMAGE_RESOURCE: &str = "oci-image";

const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Image resource fetch failures
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ImageError {
    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),
}

impl ImageError {
    /// Severity the failure should be reported with
    pub fn severity(&self) -> Severity {
        match self {
            ImageError::MissingResource(_) | ImageError::InvalidResource(_) => Severity::Blocked,
        }
    }
}

impl From<ImageError> for CheckFailed {
    fn from(err: ImageError) -> Self {
        CheckFailed {
            severity: err.severity(),
            message: err.to_string(),
        }
    }
}

/// Resolve the image resource into the details the container spec needs
pub fn fetch(resource: Option<&OciImageSpec>) -> Result<ImageDetails, ImageError> {
    let spec = resource.ok_or_else(|| ImageError::MissingResource(IMAGE_RESOURCE.to_string()))?;

    if spec.image_path.trim().is_empty() {
        return Err(ImageError::InvalidResource(IMAGE_RESOURCE.to_string()));
    }

    if let Some(policy) = &spec.pull_policy {
        if !PULL_POLICIES.contains(&policy.as_str()) {
            return Err(ImageError::InvalidResource(IMAGE_RESOURCE.to_string()));
        }
    }

    Ok(ImageDetails {
        image_path: spec.image_path.clone(),
        username: spec.username.clone(),
        password: spec.password.clone(),
        pull_policy: spec.pull_policy.clone(),
    })
}

//! S3 bucket name validation

use regex::Regex;

use crate::status::CheckFailed;

lazy_static::lazy_static! {
    /// Dot-separated labels of lowercase alphanumerics and hyphens, each
    /// label starting and ending with an alphanumeric
    static ref BUCKET_LABELS: Regex = Regex::new(
        r"^(?:(?:[a-z0-9]|[a-z0-9][a-z0-9\-]*[a-z0-9])\.)*(?:[a-z0-9]|[a-z0-9][a-z0-9\-]*[a-z0-9])$"
    ).unwrap();

    /// Names formatted like an IP address
    static ref DOTTED_NUMBERS: Regex = Regex::new(r"^(?:[0-9]+\.)+[0-9]+$").unwrap();
}

/// Validate a name against the S3 bucket naming rules
///
/// Returns the name unchanged when valid. An invalid name is a
/// configuration error, reported as blocked.
pub fn validate_s3_bucket_name(name: &str) -> Result<&str, CheckFailed> {
    let valid = (3..=63).contains(&name.len())
        && !DOTTED_NUMBERS.is_match(name)
        && BUCKET_LABELS.is_match(name);

    if valid {
        Ok(name)
    } else {
        Err(CheckFailed::blocked(format!(
            "Invalid value for config default_artifact_root '{}' - value must be a valid S3 bucket name",
            name
        )))
    }
}

//! Version filtering for patches using semver constraints
//!
//! Recipes name the Unicorn API versions they were written against, like
//! ">=0.9.0, <2.0.0". The tree's version comes from the `UC_API_MAJOR` /
//! `UC_API_MINOR` defines in `include/unicorn/unicorn.h`.

use semver::{Version, VersionReq};
use std::fmt;

/// Errors during version filtering
#[derive(Debug, Clone)]
pub enum VersionError {
    /// Invalid version string (e.g., "not-a-version")
    InvalidVersion { value: String, source: String },
    /// Invalid version requirement (e.g., ">=bad")
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version requirement '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Check if a version matches a requirement string
///
/// # Examples
///
/// ```
/// use unicorn_patcher::config::version::matches_requirement;
///
/// assert!(matches_requirement("1.0.0", Some(">=0.9.0")).unwrap());
/// assert!(matches_requirement("0.9.0", Some(">=0.9.0, <2.0.0")).unwrap());
/// assert!(!matches_requirement("0.8.0", Some(">=0.9.0")).unwrap());
///
/// // None requirement means "apply to all versions"
/// assert!(matches_requirement("1.0.0", None).unwrap());
/// ```
pub fn matches_requirement(
    version: &str,
    requirement: Option<&str>,
) -> Result<bool, VersionError> {
    // No requirement means "apply to all versions"
    let Some(req_str) = requirement else {
        return Ok(true);
    };

    // Empty requirement string means "apply to all versions"
    let req_str = req_str.trim();
    if req_str.is_empty() {
        return Ok(true);
    }

    // Parse version
    let version = Version::parse(version).map_err(|e| VersionError::InvalidVersion {
        value: version.to_string(),
        source: e.to_string(),
    })?;

    // Parse requirement
    let req = VersionReq::parse(req_str).map_err(|e| VersionError::InvalidRequirement {
        value: req_str.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(&version))
}

/// Path of the header carrying the API version, relative to the tree root.
pub const API_HEADER: &str = "include/unicorn/unicorn.h";

/// Read `major.minor.0` from the `UC_API_MAJOR` / `UC_API_MINOR` defines.
///
/// Returns `None` unless both are present and numeric.
pub fn parse_api_version(header: &str) -> Option<Version> {
    let mut major = None;
    let mut minor = None;
    for line in header.lines() {
        let mut words = line.split_whitespace();
        if words.next() != Some("#define") {
            continue;
        }
        let slot = match words.next() {
            Some("UC_API_MAJOR") => &mut major,
            Some("UC_API_MINOR") => &mut minor,
            _ => continue,
        };
        *slot = words.next().and_then(|v| v.parse::<u64>().ok());
    }
    Some(Version::new(major?, minor?, 0))
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster version gate.
//!
//! Only 4.17 and later are supported. The check runs once after discovery and
//! a failure is fatal.

use crate::constants::{
    MIN_EXCLUDED_MINOR_VERSION, MIN_VERSION_COMPONENTS, SUPPORTED_MAJOR_VERSION,
};
use crate::errors::{ProxyError, Result};

/// Report whether `version` is a supported cluster version.
///
/// # Errors
///
/// Returns [`ProxyError::MalformedVersion`] when the string has fewer than three
/// dot-separated components or its major or minor component is not a number.
pub fn is_supported(version: &str) -> Result<bool> {
    let components: Vec<&str> = version.trim().split('.').collect();
    if components.len() < MIN_VERSION_COMPONENTS {
        return Err(malformed(
            version,
            format!("expected at least {MIN_VERSION_COMPONENTS} components"),
        ));
    }
    if components[2].is_empty() {
        return Err(malformed(version, "patch component is empty".to_string()));
    }

    let major = parse_component(version, "major", components[0])?;
    let minor = parse_component(version, "minor", components[1])?;

    Ok(major == SUPPORTED_MAJOR_VERSION && minor > MIN_EXCLUDED_MINOR_VERSION)
}

/// Fail unless `version` is supported.
///
/// # Errors
///
/// Returns [`ProxyError::MalformedVersion`] for unparseable input and
/// [`ProxyError::UnsupportedVersion`] for a well-formed but unsupported version.
pub fn ensure_supported(version: &str) -> Result<()> {
    if is_supported(version)? {
        return Ok(());
    }

    let reason = if version.trim().starts_with(&format!("{SUPPORTED_MAJOR_VERSION}.")) {
        format!(
            "minimum supported is {SUPPORTED_MAJOR_VERSION}.{}+",
            MIN_EXCLUDED_MINOR_VERSION + 1
        )
    } else {
        "unknown major version".to_string()
    };

    Err(ProxyError::UnsupportedVersion {
        version: version.to_string(),
        reason,
    })
}

fn parse_component(version: &str, name: &str, component: &str) -> Result<u64> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(
            version,
            format!("{name} component '{component}' is not a number"),
        ));
    }
    component
        .parse()
        .map_err(|e| malformed(version, format!("{name} component '{component}': {e}")))
}

fn malformed(version: &str, reason: String) -> ProxyError {
    ProxyError::MalformedVersion {
        version: version.to_string(),
        reason,
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod version_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the HTTP-01 proxy.
//!
//! Every fatal startup condition is a distinct variant so an operator can tell
//! "cannot reach the cluster" apart from "cluster too old" or "no port free".
//! Rejected request paths are not errors; they are ordinary 403 responses.

use std::fmt;
use thiserror::Error;

/// Stage of environment discovery that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStage {
    /// Building the cluster API client
    ClientInit,
    /// Reading the infrastructure object
    FetchInfrastructure,
    /// Reading the ingress configuration object
    FetchIngress,
    /// Reading the cluster version object
    FetchClusterVersion,
    /// A required field was missing or not a string
    ExtractField,
    /// The ingress domain could not be turned into an API hostname
    DeriveApiHostname,
    /// Resolving the synthetic ingress hostname
    ResolveApps,
    /// Resolving the API hostname
    ResolveApi,
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::ClientInit => "client-init",
            Self::FetchInfrastructure => "fetch-infrastructure",
            Self::FetchIngress => "fetch-ingress",
            Self::FetchClusterVersion => "fetch-cluster-version",
            Self::ExtractField => "extract-field",
            Self::DeriveApiHostname => "derive-api-hostname",
            Self::ResolveApps => "resolve-apps",
            Self::ResolveApi => "resolve-api",
        };
        f.write_str(stage)
    }
}

/// Errors produced by discovery, gating, port selection, provisioning and serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// A cluster object fetch, field extraction or address resolution failed
    #[error("Discovery failed at stage {stage}: {reason}")]
    DiscoveryFailed {
        /// Stage that failed
        stage: DiscoveryStage,
        /// Underlying cause
        reason: String,
    },

    /// The cluster version string could not be parsed
    #[error("Invalid cluster version '{version}' (expecting X.Y.Z format): {reason}")]
    MalformedVersion {
        /// Raw version string
        version: String,
        /// What was wrong with it
        reason: String,
    },

    /// The cluster version parsed but is outside the supported range
    #[error("Unsupported cluster version '{version}': {reason}")]
    UnsupportedVersion {
        /// Raw version string
        version: String,
        /// Why it is rejected
        reason: String,
    },

    /// None of the candidate ports could be bound
    #[error("No ports available for the proxy to use (tried {candidates:?})")]
    NoPortAvailable {
        /// Candidate ports, in the order tried
        candidates: Vec<u16>,
    },

    /// The final listener could not be bound
    #[error("Failed to listen on port {port}: {reason}")]
    ListenFailed {
        /// Port that was chosen
        port: u16,
        /// Underlying cause
        reason: String,
    },

    /// A redirect provisioning strategy failed
    #[error("Failed to provision redirect rule via {strategy}: {reason}")]
    ProvisioningFailed {
        /// Strategy name (e.g. `iptables`, `machine-config`)
        strategy: String,
        /// Underlying cause
        reason: String,
    },

    /// The backend could not be reached for a single request
    #[error("Backend unavailable: {reason}")]
    BackendUnavailable {
        /// Underlying cause
        reason: String,
    },
}

impl ProxyError {
    /// Shorthand for [`ProxyError::DiscoveryFailed`].
    pub fn discovery(stage: DiscoveryStage, reason: impl fmt::Display) -> Self {
        Self::DiscoveryFailed {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`ProxyError::ProvisioningFailed`].
    pub fn provisioning(strategy: &str, reason: impl fmt::Display) -> Self {
        Self::ProvisioningFailed {
            strategy: strategy.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` when the error must terminate the process.
    ///
    /// Backend failures are recovered per request as a 502.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

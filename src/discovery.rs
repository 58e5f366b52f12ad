// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster environment discovery.
//!
//! Reads the cluster-wide configuration singletons and resolves the two
//! externally visible addresses:
//!
//! 1. `infrastructures/cluster` provides `status.platform`
//! 2. `ingresses/cluster` provides `spec.domain` (e.g. `apps.cluster1.example.com`)
//! 3. the API hostname is the ingress domain with its leading label replaced by `api`
//! 4. `clusterversions/version` provides `status.desired.version` (optional)
//! 5. the APPS address is resolved through `test.<domain>`, which is covered by
//!    the wildcard ingress record whether or not any application exists
//! 6. the API address is resolved from the API hostname
//!
//! Any failing step aborts discovery with a [`ProxyError::DiscoveryFailed`]
//! naming the stage.

use crate::constants::{
    API_HOSTNAME_LABEL, APPS_DOMAIN_LABEL, APPS_LOOKUP_PREFIX, CLUSTER_SINGLETON_NAME,
    CLUSTER_VERSION_SINGLETON_NAME, CONFIG_API_GROUP, CONFIG_API_VERSION, KIND_CLUSTER_VERSION,
    KIND_INFRASTRUCTURE, KIND_INGRESS, PLURAL_CLUSTER_VERSIONS, PLURAL_INFRASTRUCTURES,
    PLURAL_INGRESSES,
};
use crate::errors::{DiscoveryStage, ProxyError, Result};
use crate::resolver::{resolve, AddressResolver};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// The cluster-wide configuration objects discovery reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigObject {
    /// `infrastructures.config.openshift.io/cluster`
    Infrastructure,
    /// `ingresses.config.openshift.io/cluster`
    Ingress,
    /// `clusterversions.config.openshift.io/version`
    ClusterVersion,
}

impl ConfigObject {
    /// API group of the object
    #[must_use]
    pub fn group(self) -> &'static str {
        CONFIG_API_GROUP
    }

    /// API version of the object
    #[must_use]
    pub fn version(self) -> &'static str {
        CONFIG_API_VERSION
    }

    /// Kind of the object
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Infrastructure => KIND_INFRASTRUCTURE,
            Self::Ingress => KIND_INGRESS,
            Self::ClusterVersion => KIND_CLUSTER_VERSION,
        }
    }

    /// Plural resource name of the object
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::Infrastructure => PLURAL_INFRASTRUCTURES,
            Self::Ingress => PLURAL_INGRESSES,
            Self::ClusterVersion => PLURAL_CLUSTER_VERSIONS,
        }
    }

    /// Well-known singleton name of the object
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Infrastructure | Self::Ingress => CLUSTER_SINGLETON_NAME,
            Self::ClusterVersion => CLUSTER_VERSION_SINGLETON_NAME,
        }
    }

    /// Field path holding the value discovery needs
    #[must_use]
    pub fn field_path(self) -> &'static [&'static str] {
        match self {
            Self::Infrastructure => &["status", "platform"],
            Self::Ingress => &["spec", "domain"],
            Self::ClusterVersion => &["status", "desired", "version"],
        }
    }

    fn fetch_stage(self) -> DiscoveryStage {
        match self {
            Self::Infrastructure => DiscoveryStage::FetchInfrastructure,
            Self::Ingress => DiscoveryStage::FetchIngress,
            Self::ClusterVersion => DiscoveryStage::FetchClusterVersion,
        }
    }
}

/// Read-only access to cluster configuration objects.
///
/// Implemented by [`crate::cluster::ClusterClient`] against the API server and by
/// in-memory fakes in tests.
#[async_trait]
pub trait ClusterConfigSource: Send + Sync {
    /// Fetch `object` and return it as untyped JSON.
    async fn fetch(&self, object: ConfigObject) -> anyhow::Result<Value>;
}

/// Knobs for a discovery pass.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    /// Whether to read the cluster version object
    pub fetch_version: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            fetch_version: true,
        }
    }
}

/// Addresses and identity of the cluster, computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoints {
    /// Control-plane hostname derived from the ingress domain
    pub api_hostname: String,
    /// Address the API hostname resolves to
    pub api_address: IpAddr,
    /// Address the ingress wildcard resolves to
    pub apps_address: IpAddr,
    /// Platform identifier (e.g. `BareMetal`)
    pub platform: String,
    /// Desired cluster version, when it was fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClusterEndpoints {
    /// A proxy is only needed when the two addresses differ.
    #[must_use]
    pub fn needs_proxy(&self) -> bool {
        self.api_address != self.apps_address
    }
}

/// Run one discovery pass.
///
/// # Errors
///
/// Returns [`ProxyError::DiscoveryFailed`] naming the first stage that failed.
pub async fn discover<S, R>(
    source: &S,
    resolver: &R,
    options: DiscoveryOptions,
) -> Result<ClusterEndpoints>
where
    S: ClusterConfigSource + ?Sized,
    R: AddressResolver + ?Sized,
{
    let platform = fetch_field(source, ConfigObject::Infrastructure).await?;
    debug!(platform = %platform, "Discovered platform");

    let ingress_domain = fetch_field(source, ConfigObject::Ingress).await?;
    let api_hostname = derive_api_hostname(&ingress_domain)?;
    debug!(
        ingress_domain = %ingress_domain,
        api_hostname = %api_hostname,
        "Derived API hostname"
    );

    let version = if options.fetch_version {
        Some(fetch_field(source, ConfigObject::ClusterVersion).await?)
    } else {
        None
    };

    let lookup_hostname = apps_lookup_hostname(&ingress_domain);
    let apps_address = resolve(resolver, &lookup_hostname)
        .await
        .map_err(|e| {
            ProxyError::discovery(DiscoveryStage::ResolveApps, format!("{lookup_hostname}: {e}"))
        })?;

    let api_address = resolve(resolver, &api_hostname)
        .await
        .map_err(|e| {
            ProxyError::discovery(DiscoveryStage::ResolveApi, format!("{api_hostname}: {e}"))
        })?;

    let endpoints = ClusterEndpoints {
        api_hostname,
        api_address,
        apps_address,
        platform,
        version,
    };

    info!(
        api_hostname = %endpoints.api_hostname,
        api_address = %endpoints.api_address,
        apps_address = %endpoints.apps_address,
        platform = %endpoints.platform,
        version = endpoints.version.as_deref().unwrap_or("unknown"),
        "Discovered cluster endpoints"
    );

    Ok(endpoints)
}

/// Replace the leading label of the ingress domain with `api`.
///
/// `apps.cluster1.example.com` becomes `api.cluster1.example.com`.
///
/// # Errors
///
/// Returns [`ProxyError::DiscoveryFailed`] if the domain has fewer than two labels.
pub fn derive_api_hostname(ingress_domain: &str) -> Result<String> {
    let domain = ingress_domain.trim().trim_end_matches('.');
    let Some((leading, rest)) = domain.split_once('.') else {
        return Err(ProxyError::discovery(
            DiscoveryStage::DeriveApiHostname,
            format!("ingress domain '{ingress_domain}' has no parent domain"),
        ));
    };
    if leading.is_empty() || rest.is_empty() {
        return Err(ProxyError::discovery(
            DiscoveryStage::DeriveApiHostname,
            format!("ingress domain '{ingress_domain}' has an empty label"),
        ));
    }
    if leading != APPS_DOMAIN_LABEL {
        warn!(
            ingress_domain,
            leading_label = leading,
            "Ingress domain does not start with '{APPS_DOMAIN_LABEL}', replacing leading label anyway"
        );
    }
    Ok(format!("{API_HOSTNAME_LABEL}.{rest}"))
}

/// Synthetic hostname under the ingress wildcard used to find the APPS address.
#[must_use]
pub fn apps_lookup_hostname(ingress_domain: &str) -> String {
    format!(
        "{APPS_LOOKUP_PREFIX}{}",
        ingress_domain.trim().trim_end_matches('.')
    )
}

/// Walk `path` through nested JSON maps and return the string found there.
#[must_use]
pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
}

async fn fetch_field<S>(source: &S, object: ConfigObject) -> Result<String>
where
    S: ClusterConfigSource + ?Sized,
{
    let value = source.fetch(object).await.map_err(|e| {
        ProxyError::discovery(
            object.fetch_stage(),
            format!("{}/{}: {e:#}", object.plural(), object.name()),
        )
    })?;

    nested_str(&value, object.field_path())
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProxyError::discovery(
                DiscoveryStage::ExtractField,
                format!(
                    "{}/{} has no string field {}",
                    object.plural(),
                    object.name(),
                    object.field_path().join(".")
                ),
            )
        })
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod discovery_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Declarative redirect provisioning through node configuration.
//!
//! For clusters whose nodes are managed by the machine-config operator, the
//! redirect is expressed as an nftables ruleset written to every control-plane
//! node. Two documents are rendered:
//!
//! - `MachineConfiguration/cluster` with a node disruption policy that restarts
//!   `nftables.service` when the ruleset file changes instead of rebooting
//! - `MachineConfig/98-nftables-crtmgr-proxy` carrying the base64-encoded
//!   ruleset and the unit that loads it
//!
//! Rendering ([`render`]) is a pure function of the rule. Submission goes
//! through [`ManifestApplier`] as a server-side apply under a fixed field
//! manager, so resubmitting identical documents converges instead of
//! conflicting. Nodes pick up the change asynchronously as the pool reconciles.

use super::{ProvisionMode, RedirectProvisioner, RedirectRule};
use crate::constants::{
    IGNITION_VERSION, KIND_MACHINE_CONFIG, KIND_MACHINE_CONFIGURATION, MACHINE_CONFIGURATION_GROUP,
    MACHINE_CONFIGURATION_NAME, MACHINE_CONFIGURATION_VERSION, MACHINE_CONFIG_GROUP,
    MACHINE_CONFIG_NAME, MACHINE_CONFIG_ROLE, MACHINE_CONFIG_ROLE_LABEL, MACHINE_CONFIG_VERSION,
    NFT_CHAIN_NAME, NFT_CONFIG_FILE_MODE, NFT_CONFIG_PATH, NFT_SERVICE_NAME, NFT_TABLE_NAME,
    PLURAL_MACHINE_CONFIGS, PLURAL_MACHINE_CONFIGURATIONS,
};
use crate::errors::{ProxyError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::{debug, info};

// Embed node configuration templates at compile time
const NFT_RULESET_TEMPLATE: &str = include_str!("../../templates/nftables.conf.tmpl");
const NFT_SERVICE_TEMPLATE: &str = include_str!("../../templates/nftables.service.tmpl");

/// Prefix of an ignition inline file source
const IGNITION_DATA_URL_PREFIX: &str = "data:text/plain;charset=utf-8;base64,";

/// Kinds of documents the declarative strategy submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// `operator.openshift.io/v1 MachineConfiguration`
    MachineConfiguration,
    /// `machineconfiguration.openshift.io/v1 MachineConfig`
    MachineConfig,
}

impl ManifestKind {
    /// API group of the kind
    #[must_use]
    pub fn group(self) -> &'static str {
        match self {
            Self::MachineConfiguration => MACHINE_CONFIGURATION_GROUP,
            Self::MachineConfig => MACHINE_CONFIG_GROUP,
        }
    }

    /// API version of the kind
    #[must_use]
    pub fn version(self) -> &'static str {
        match self {
            Self::MachineConfiguration => MACHINE_CONFIGURATION_VERSION,
            Self::MachineConfig => MACHINE_CONFIG_VERSION,
        }
    }

    /// Kind name
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::MachineConfiguration => KIND_MACHINE_CONFIGURATION,
            Self::MachineConfig => KIND_MACHINE_CONFIG,
        }
    }

    /// Plural resource name
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::MachineConfiguration => PLURAL_MACHINE_CONFIGURATIONS,
            Self::MachineConfig => PLURAL_MACHINE_CONFIGS,
        }
    }

    /// `apiVersion` field value
    #[must_use]
    pub fn api_version(self) -> String {
        format!("{}/{}", self.group(), self.version())
    }
}

/// Submits whole documents with apply semantics.
///
/// Implemented by [`crate::cluster::ClusterClient`] and by recording fakes in tests.
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Server-side apply `manifest` as `kind`.
    async fn apply(&self, kind: ManifestKind, manifest: &Value) -> anyhow::Result<()>;
}

/// The documents realizing a redirect rule on managed nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    /// Plain nftables ruleset written to each node
    pub ruleset: String,
    /// Cluster-wide disruption policy document
    pub machine_configuration: Value,
    /// Per-node configuration document embedding the ruleset
    pub machine_config: Value,
}

impl RenderedArtifact {
    /// Documents in submission order.
    #[must_use]
    pub fn manifests(&self) -> [(ManifestKind, &Value); 2] {
        [
            (ManifestKind::MachineConfiguration, &self.machine_configuration),
            (ManifestKind::MachineConfig, &self.machine_config),
        ]
    }

    /// Both documents as a multi-document YAML stream.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be serialized.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        let mut out = String::new();
        for (_, manifest) in self.manifests() {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(manifest)?);
        }
        Ok(out)
    }
}

/// Render the nftables ruleset for `rule`.
#[must_use]
pub fn render_ruleset(rule: &RedirectRule) -> String {
    let family = if rule.target_address.is_ipv6() {
        "ip6"
    } else {
        "ip"
    };
    NFT_RULESET_TEMPLATE
        .replace("{{TABLE}}", NFT_TABLE_NAME)
        .replace("{{CHAIN}}", NFT_CHAIN_NAME)
        .replace("{{FAMILY}}", family)
        .replace("{{API_ADDRESS}}", &rule.target_address.to_string())
        .replace("{{SOURCE_PORT}}", &rule.source_port.to_string())
        .replace("{{PROXY_PORT}}", &rule.destination_port.to_string())
}

/// Render the systemd unit that loads the ruleset.
#[must_use]
pub fn render_service_unit() -> String {
    NFT_SERVICE_TEMPLATE
        .replace("{{CONFIG_PATH}}", NFT_CONFIG_PATH)
        .replace("{{TABLE}}", NFT_TABLE_NAME)
}

/// Build the `MachineConfiguration` disruption policy document.
#[must_use]
pub fn build_machine_configuration() -> Value {
    json!({
        "apiVersion": ManifestKind::MachineConfiguration.api_version(),
        "kind": KIND_MACHINE_CONFIGURATION,
        "metadata": {
            "name": MACHINE_CONFIGURATION_NAME,
        },
        "spec": {
            "nodeDisruptionPolicy": {
                "files": [{
                    "actions": [{
                        "restart": { "serviceName": NFT_SERVICE_NAME },
                        "type": "Restart",
                    }],
                    "path": NFT_CONFIG_PATH,
                }],
                "units": [{
                    "actions": [
                        { "type": "DaemonReload" },
                        {
                            "type": "Reload",
                            "reload": { "serviceName": NFT_SERVICE_NAME },
                        },
                    ],
                    "name": NFT_SERVICE_NAME,
                }],
            },
        },
    })
}

/// Build the `MachineConfig` document carrying `ruleset`.
#[must_use]
pub fn build_machine_config(ruleset: &str) -> Value {
    let source = format!("{IGNITION_DATA_URL_PREFIX}{}", STANDARD.encode(ruleset));

    json!({
        "apiVersion": ManifestKind::MachineConfig.api_version(),
        "kind": KIND_MACHINE_CONFIG,
        "metadata": {
            "labels": {
                MACHINE_CONFIG_ROLE_LABEL: MACHINE_CONFIG_ROLE,
            },
            "name": MACHINE_CONFIG_NAME,
        },
        "spec": {
            "config": {
                "ignition": { "version": IGNITION_VERSION },
                "storage": {
                    "files": [{
                        "contents": { "source": source },
                        "mode": NFT_CONFIG_FILE_MODE,
                        "overwrite": true,
                        "path": NFT_CONFIG_PATH,
                    }],
                },
                "systemd": {
                    "units": [{
                        "contents": render_service_unit(),
                        "enabled": true,
                        "name": NFT_SERVICE_NAME,
                    }],
                },
            },
        },
    })
}

/// Render both documents for `rule`. Pure; no I/O.
#[must_use]
pub fn render(rule: &RedirectRule) -> RenderedArtifact {
    let ruleset = render_ruleset(rule);
    RenderedArtifact {
        machine_configuration: build_machine_configuration(),
        machine_config: build_machine_config(&ruleset),
        ruleset,
    }
}

/// Dump the rendered documents at debug level, or the reason they could not
/// be dumped.
fn log_rendered(yaml: std::result::Result<String, serde_yaml::Error>) {
    match yaml {
        Ok(yaml) => debug!(manifests = %yaml, "Rendered node configuration"),
        Err(e) => debug!(error = %e, "Failed to render node configuration as YAML"),
    }
}

/// Decode the ruleset embedded in a rendered `MachineConfig`.
#[must_use]
pub fn embedded_ruleset(machine_config: &Value) -> Option<String> {
    let source = machine_config
        .pointer("/spec/config/storage/files/0/contents/source")?
        .as_str()?;
    let encoded = source.strip_prefix(IGNITION_DATA_URL_PREFIX)?;
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Applies the rendered documents to the cluster.
pub struct MachineConfigProvisioner<A: ManifestApplier> {
    applier: A,
}

impl<A: ManifestApplier> MachineConfigProvisioner<A> {
    /// Provisioner submitting through `applier`
    pub fn new(applier: A) -> Self {
        Self { applier }
    }
}

#[async_trait]
impl<A: ManifestApplier> RedirectProvisioner for MachineConfigProvisioner<A> {
    fn strategy(&self) -> &'static str {
        ProvisionMode::MachineConfig.as_str()
    }

    async fn ensure(&self, rule: &RedirectRule) -> Result<()> {
        let artifact = render(rule);
        log_rendered(artifact.to_yaml());

        for (kind, manifest) in artifact.manifests() {
            self.applier.apply(kind, manifest).await.map_err(|e| {
                ProxyError::provisioning(self.strategy(), format!("{}: {e:#}", kind.kind()))
            })?;
            info!(kind = kind.kind(), "Applied node configuration");
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "machineconfig_tests.rs"]
mod machineconfig_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes API access.
//!
//! [`ClusterClient`] is created once in `main` and handed by reference to
//! discovery (read side) and to the declarative redirect provisioner (write
//! side). All objects are handled as [`DynamicObject`]s because none of the
//! cluster configuration types ship with `k8s-openapi`.

use crate::constants::FIELD_MANAGER;
use crate::discovery::{ClusterConfigSource, ConfigObject};
use crate::errors::{DiscoveryStage, ProxyError, Result};
use crate::redirect::machineconfig::{ManifestApplier, ManifestKind};
use anyhow::Context as _;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Process-wide Kubernetes client.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::DiscoveryFailed`] at stage `client-init` when no
    /// configuration can be inferred.
    pub async fn try_default() -> Result<Self> {
        debug!("Initializing Kubernetes client");
        let client = Client::try_default()
            .await
            .map_err(|e| ProxyError::discovery(DiscoveryStage::ClientInit, e))?;
        debug!("Kubernetes client initialized successfully");
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), resource)
    }
}

/// Build an [`ApiResource`] for a cluster-scoped object.
#[must_use]
pub fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

#[async_trait]
impl ClusterConfigSource for ClusterClient {
    async fn fetch(&self, object: ConfigObject) -> anyhow::Result<Value> {
        let resource = api_resource(
            object.group(),
            object.version(),
            object.kind(),
            object.plural(),
        );
        debug!(
            resource = object.plural(),
            name = object.name(),
            "Fetching cluster configuration object"
        );

        let found = self
            .dynamic_api(&resource)
            .get(object.name())
            .await
            .with_context(|| format!("failed to get {}/{}", object.plural(), object.name()))?;

        serde_json::to_value(found).context("failed to serialize dynamic object")
    }
}

#[async_trait]
impl ManifestApplier for ClusterClient {
    async fn apply(&self, kind: ManifestKind, manifest: &Value) -> anyhow::Result<()> {
        let resource = api_resource(kind.group(), kind.version(), kind.kind(), kind.plural());
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .context("manifest has no metadata.name")?;

        debug!(kind = kind.kind(), name, "Applying manifest");

        self.dynamic_api(&resource)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(manifest),
            )
            .await
            .with_context(|| format!("failed to apply {}/{name}", kind.plural()))?;

        Ok(())
    }
}

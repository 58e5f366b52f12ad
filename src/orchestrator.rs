// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Startup sequencing.
//!
//! Discovery, the version gate, port selection, listener bind and redirect
//! provisioning run once, in order, before the router serves anything. Either
//! every step succeeds and a [`ReadyProxy`] is returned, or the first failure
//! is returned and nothing is left half started. The challenge listener and
//! the optional metrics listener are both bound before the redirect is
//! provisioned, so a failed bind never leaves a rule pointing at a port nobody
//! serves.

use crate::config::Cli;
use crate::discovery::{discover, ClusterConfigSource, ClusterEndpoints, DiscoveryOptions};
use crate::errors::{ProxyError, Result};
use crate::metrics::metrics_router;
use crate::port::select_port;
use crate::proxy::{backend_client, bind, router, serve, ProxyConfig};
use crate::redirect::{provision, RedirectProvisioner, RedirectRule};
use crate::resolver::AddressResolver;
use crate::version::ensure_supported;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Startup parameters taken from the command line.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Interface for the port check and the listener
    pub bind_address: IpAddr,
    /// Ordered candidate ports
    pub ports: Vec<u16>,
    /// Whether to read and gate on the cluster version
    pub check_version: bool,
    /// Port for the `/metrics` listener, if any
    pub metrics_port: Option<u16>,
}

impl From<&Cli> for StartupOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            bind_address: cli.bind_address,
            ports: cli.ports.clone(),
            check_version: !cli.skip_version_check,
            metrics_port: cli.metrics_port,
        }
    }
}

/// Result of the startup sequence.
#[derive(Debug)]
pub enum Startup {
    /// API and APPS share an address; nothing to do
    NoProxyNeeded(ClusterEndpoints),
    /// Listener bound and redirect provisioned
    Ready(ReadyProxy),
}

/// A proxy that has completed startup and can serve.
#[derive(Debug)]
pub struct ReadyProxy {
    /// Discovered cluster endpoints
    pub endpoints: ClusterEndpoints,
    /// Provisioned redirect
    pub rule: RedirectRule,
    /// Router configuration
    pub config: ProxyConfig,
    listener: TcpListener,
    metrics_listener: Option<TcpListener>,
}

impl ReadyProxy {
    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address the metrics listener is bound to, when one was requested
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn metrics_addr(&self) -> std::io::Result<Option<SocketAddr>> {
        self.metrics_listener
            .as_ref()
            .map(TcpListener::local_addr)
            .transpose()
    }

    /// Serve challenges until `shutdown` resolves. The metrics listener, if
    /// any, is served in the background.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ListenFailed`] if the server stops with an I/O error
    /// or the backend client cannot be built.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let port = self.config.listen_port;
        let client = backend_client().map_err(|e| ProxyError::ListenFailed {
            port,
            reason: format!("failed to build backend client: {e}"),
        })?;

        if let Some(metrics_listener) = self.metrics_listener {
            spawn_metrics_server(metrics_listener);
        }

        info!(
            port,
            backend = %self.config.backend_base_url,
            "Serving ACME HTTP-01 challenges"
        );
        serve(self.listener, router(self.config, client), shutdown).await
    }
}

/// Run discovery through provisioning.
///
/// # Errors
///
/// Returns the first fatal [`ProxyError`] encountered.
pub async fn start<S, R, P>(
    source: &S,
    resolver: &R,
    provisioner: &P,
    options: &StartupOptions,
) -> Result<Startup>
where
    S: ClusterConfigSource + ?Sized,
    R: AddressResolver + ?Sized,
    P: RedirectProvisioner + ?Sized,
{
    if let Some(metrics_port) = options.metrics_port {
        if options.ports.contains(&metrics_port) {
            return Err(ProxyError::ListenFailed {
                port: metrics_port,
                reason: "metrics port is also a proxy candidate port".to_string(),
            });
        }
    }

    let discovery_options = DiscoveryOptions {
        fetch_version: options.check_version,
    };
    let endpoints = discover(source, resolver, discovery_options).await?;

    match endpoints.version.as_deref() {
        Some(version) => ensure_supported(version)?,
        None => warn!("Cluster version check skipped"),
    }

    if !endpoints.needs_proxy() {
        info!(
            address = %endpoints.api_address,
            "API and APPS addresses are the same, no proxy needed"
        );
        return Ok(Startup::NoProxyNeeded(endpoints));
    }

    let port = select_port(options.bind_address, &options.ports)?;
    let config = ProxyConfig::for_apps_address(endpoints.apps_address, port)?;
    let listener = bind(options.bind_address, port).await?;
    let metrics_listener = match options.metrics_port {
        Some(metrics_port) => Some(bind(options.bind_address, metrics_port).await?),
        None => None,
    };

    let rule = RedirectRule::new(endpoints.api_address, port);
    provision(provisioner, &rule).await?;

    Ok(Startup::Ready(ReadyProxy {
        endpoints,
        rule,
        config,
        listener,
        metrics_listener,
    }))
}

/// Serve `/metrics` on an already bound listener in the background.
fn spawn_metrics_server(listener: TcpListener) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
    info!(port, "Serving metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router()).await {
            error!(error = %e, "Metrics server stopped");
        }
    });
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable so the proxy is
//! configurable from a pod spec without rewriting its arguments.

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_CANDIDATE_PORTS, DEFAULT_IPTABLES_PATH};
use crate::redirect::iptables::DEFAULT_IP6TABLES_PATH;
use crate::redirect::ProvisionMode;
use clap::Parser;
use std::net::IpAddr;

/// Forwards ACME HTTP-01 challenges from the API address to the ingress address
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "acme-http01-proxy", version, about, long_about = None)]
pub struct Cli {
    /// How the port-80 redirect rule is provisioned
    #[arg(long, env = "PROXY_REDIRECT_MODE", value_enum, default_value_t = ProvisionMode::LogOnly)]
    pub mode: ProvisionMode,

    /// Ordered candidate ports for the proxy listener
    #[arg(
        long,
        env = "PROXY_CANDIDATE_PORTS",
        value_delimiter = ',',
        default_values_t = DEFAULT_CANDIDATE_PORTS.to_vec(),
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub ports: Vec<u16>,

    /// Address the port check and the listener bind to
    #[arg(long, env = "PROXY_BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: IpAddr,

    /// Do not read the cluster version nor enforce the minimum version
    #[arg(long, env = "PROXY_SKIP_VERSION_CHECK")]
    pub skip_version_check: bool,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "PROXY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// iptables executable used by the `iptables` mode
    #[arg(long, env = "PROXY_IPTABLES_PATH", default_value = DEFAULT_IPTABLES_PATH)]
    pub iptables_path: String,

    /// ip6tables executable used by the `iptables` mode for IPv6 targets
    #[arg(long, env = "PROXY_IP6TABLES_PATH", default_value = DEFAULT_IP6TABLES_PATH)]
    pub ip6tables_path: String,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            mode: ProvisionMode::LogOnly,
            ports: DEFAULT_CANDIDATE_PORTS.to_vec(),
            bind_address: IpAddr::from([0, 0, 0, 0]),
            skip_version_check: false,
            metrics_port: None,
            iptables_path: DEFAULT_IPTABLES_PATH.to_string(),
            ip6tables_path: DEFAULT_IP6TABLES_PATH.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;

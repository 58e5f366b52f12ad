// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Port-80 redirect provisioning.
//!
//! A [`RedirectRule`] states one fact: TCP traffic to `target_address:80` is
//! redirected to the proxy's listen port. [`RedirectProvisioner`] makes that
//! fact true, and each strategy does so idempotently:
//!
//! - [`iptables::IptablesProvisioner`] mutates the local node's NAT table,
//!   appending the rule only when an equivalent one is absent
//! - [`machineconfig::MachineConfigProvisioner`] renders an nftables ruleset
//!   into node configuration documents and server-side applies them, so the
//!   whole control-plane pool enforces the rule across reboots
//! - [`LogOnlyProvisioner`] leaves the rule to the operator
//!
//! Whatever the strategy, the equivalent `iptables` command line is logged.

pub mod iptables;
pub mod machineconfig;

use crate::constants::REDIRECT_SOURCE_PORT;
use crate::errors::Result;
use crate::metrics::record_provisioning;
use async_trait::async_trait;
use clap::ValueEnum;
use std::fmt;
use std::net::IpAddr;
use tracing::{error, info};

/// Redirect of inbound port 80 traffic for one address into the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectRule {
    /// Address whose inbound traffic is redirected (the API address)
    pub target_address: IpAddr,
    /// Inbound destination port, always 80
    pub source_port: u16,
    /// Port the proxy listens on
    pub destination_port: u16,
}

impl RedirectRule {
    /// Rule redirecting `target_address:80` to `destination_port`.
    #[must_use]
    pub fn new(target_address: IpAddr, destination_port: u16) -> Self {
        Self {
            target_address,
            source_port: REDIRECT_SOURCE_PORT,
            destination_port,
        }
    }

    /// Human-readable `iptables` command that realizes the rule.
    #[must_use]
    pub fn iptables_command(&self) -> String {
        let program = if self.target_address.is_ipv6() {
            "ip6tables"
        } else {
            "iptables"
        };
        format!(
            "{program} {}",
            iptables::rule_args(iptables::RuleOp::Append, self).join(" ")
        )
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = std::net::SocketAddr::new(self.target_address, self.source_port);
        write!(f, "tcp {target} -> :{}", self.destination_port)
    }
}

/// How the redirect rule is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProvisionMode {
    /// Log the rule and leave it to the operator
    LogOnly,
    /// Insert the rule into the local NAT table
    Iptables,
    /// Render and apply node configuration for the control-plane pool
    MachineConfig,
}

impl ProvisionMode {
    /// Strategy name used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogOnly => "log-only",
            Self::Iptables => "iptables",
            Self::MachineConfig => "machine-config",
        }
    }
}

impl fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability to ensure a redirect rule exists.
///
/// Implementations must be idempotent: ensuring the same rule twice leaves
/// exactly one rule in effect and does not fail.
#[async_trait]
pub trait RedirectProvisioner: Send + Sync {
    /// Strategy name used in logs and metrics.
    fn strategy(&self) -> &'static str;

    /// Make `rule` active.
    async fn ensure(&self, rule: &RedirectRule) -> Result<()>;
}

/// Provisioner that only reports the rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyProvisioner;

#[async_trait]
impl RedirectProvisioner for LogOnlyProvisioner {
    fn strategy(&self) -> &'static str {
        ProvisionMode::LogOnly.as_str()
    }

    async fn ensure(&self, rule: &RedirectRule) -> Result<()> {
        info!(
            "The following IPTables rule must be added for the proxy to work: {}",
            rule.iptables_command()
        );
        Ok(())
    }
}

/// Run `provisioner` for `rule`, logging the equivalent command and recording the outcome.
///
/// # Errors
///
/// Propagates the provisioner's error.
pub async fn provision<P>(provisioner: &P, rule: &RedirectRule) -> Result<()>
where
    P: RedirectProvisioner + ?Sized,
{
    let strategy = provisioner.strategy();
    info!(
        strategy,
        rule = %rule,
        command = %rule.iptables_command(),
        "Provisioning redirect rule"
    );

    match provisioner.ensure(rule).await {
        Ok(()) => {
            record_provisioning(strategy, true);
            info!(strategy, rule = %rule, "Redirect rule provisioned");
            Ok(())
        }
        Err(e) => {
            record_provisioning(strategy, false);
            error!(strategy, rule = %rule, error = %e, "Redirect rule provisioning failed");
            Err(e)
        }
    }
}

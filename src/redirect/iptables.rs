// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Imperative redirect provisioning through `iptables`.
//!
//! The rule lives in the `nat` table's `PREROUTING` chain of the node this
//! process runs on. `iptables -C` is consulted first; `-A` runs only when the
//! check reports the rule missing (exit status 1), so repeated runs never
//! stack duplicates.

use super::{ProvisionMode, RedirectProvisioner, RedirectRule};
use crate::constants::DEFAULT_IPTABLES_PATH;
use crate::errors::{ProxyError, Result};
use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::{debug, info};

/// Default `ip6tables` executable
pub const DEFAULT_IP6TABLES_PATH: &str = "ip6tables";

/// Exit status `iptables -C` uses for "no such rule"
const RULE_MISSING_EXIT_CODE: i32 = 1;

/// Rule operation passed to iptables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// `-C`: check whether the rule exists
    Check,
    /// `-A`: append the rule
    Append,
}

impl RuleOp {
    fn flag(self) -> &'static str {
        match self {
            Self::Check => "-C",
            Self::Append => "-A",
        }
    }
}

/// Arguments describing `rule` for the given operation.
#[must_use]
pub fn rule_args(op: RuleOp, rule: &RedirectRule) -> Vec<String> {
    vec![
        "-t".to_string(),
        "nat".to_string(),
        op.flag().to_string(),
        "PREROUTING".to_string(),
        "-d".to_string(),
        rule.target_address.to_string(),
        "-p".to_string(),
        "tcp".to_string(),
        "--dport".to_string(),
        rule.source_port.to_string(),
        "-j".to_string(),
        "REDIRECT".to_string(),
        "--to-port".to_string(),
        rule.destination_port.to_string(),
    ]
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Executes external programs; faked in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Runs real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        debug!(command = ?cmd, "Executing firewall command");
        Ok(cmd.output().await?.into())
    }
}

/// Inserts the redirect rule into the local NAT table.
pub struct IptablesProvisioner<R: CommandRunner = SystemCommandRunner> {
    iptables_path: String,
    ip6tables_path: String,
    runner: R,
}

impl IptablesProvisioner<SystemCommandRunner> {
    /// Provisioner executing the given `iptables` binary.
    #[must_use]
    pub fn new(iptables_path: impl Into<String>) -> Self {
        Self::with_runner(iptables_path, SystemCommandRunner)
    }
}

impl Default for IptablesProvisioner<SystemCommandRunner> {
    fn default() -> Self {
        Self::new(DEFAULT_IPTABLES_PATH)
    }
}

impl<R: CommandRunner> IptablesProvisioner<R> {
    /// Provisioner with a custom command runner
    pub fn with_runner(iptables_path: impl Into<String>, runner: R) -> Self {
        Self {
            iptables_path: iptables_path.into(),
            ip6tables_path: DEFAULT_IP6TABLES_PATH.to_string(),
            runner,
        }
    }

    /// Override the executable used for IPv6 targets
    #[must_use]
    pub fn with_ip6tables_path(mut self, path: impl Into<String>) -> Self {
        self.ip6tables_path = path.into();
        self
    }

    fn program_for(&self, rule: &RedirectRule) -> &str {
        if rule.target_address.is_ipv6() {
            &self.ip6tables_path
        } else {
            &self.iptables_path
        }
    }

    async fn run(&self, op: RuleOp, rule: &RedirectRule) -> Result<CommandOutput> {
        let program = self.program_for(rule);
        self.runner
            .run(program, &rule_args(op, rule))
            .await
            .map_err(|e| {
                ProxyError::provisioning(
                    self.strategy(),
                    format!("failed to execute {program}: {e}"),
                )
            })
    }
}

#[async_trait]
impl<R: CommandRunner> RedirectProvisioner for IptablesProvisioner<R> {
    fn strategy(&self) -> &'static str {
        ProvisionMode::Iptables.as_str()
    }

    async fn ensure(&self, rule: &RedirectRule) -> Result<()> {
        let check = self.run(RuleOp::Check, rule).await?;
        if check.success() {
            info!(rule = %rule, "Redirect rule already present");
            return Ok(());
        }
        if check.code != Some(RULE_MISSING_EXIT_CODE) {
            return Err(ProxyError::provisioning(
                self.strategy(),
                format!(
                    "rule check exited with {:?}: {}",
                    check.code,
                    check.stderr.trim()
                ),
            ));
        }

        let append = self.run(RuleOp::Append, rule).await?;
        if !append.success() {
            return Err(ProxyError::provisioning(
                self.strategy(),
                format!(
                    "rule append exited with {:?}: {}",
                    append.code,
                    append.stderr.trim()
                ),
            ));
        }

        info!(rule = %rule, "Redirect rule appended");
        Ok(())
    }
}

#[cfg(test)]
#[path = "iptables_tests.rs"]
mod iptables_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory fakes shared by unit tests.

use crate::discovery::{ClusterConfigSource, ConfigObject};
use crate::redirect::iptables::{CommandOutput, CommandRunner};
use crate::redirect::machineconfig::{ManifestApplier, ManifestKind};
use crate::resolver::AddressResolver;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Resolver answering from a fixed table; unknown hosts fail with `NotFound`.
#[derive(Debug, Default, Clone)]
pub struct FakeResolver {
    records: HashMap<String, Vec<IpAddr>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hostname: &str, addresses: &[&str]) -> Self {
        let parsed = addresses
            .iter()
            .map(|a| a.parse().expect("test address must parse"))
            .collect();
        self.records.insert(hostname.to_string(), parsed);
        self
    }
}

#[async_trait]
impl AddressResolver for FakeResolver {
    async fn lookup(&self, hostname: &str) -> io::Result<Vec<IpAddr>> {
        self.records.get(hostname).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown host {hostname}"))
        })
    }
}

/// Config source serving canned objects; missing objects fail like a 404.
#[derive(Debug, Default, Clone)]
pub struct FakeConfigSource {
    objects: HashMap<ConfigObject, Value>,
}

impl FakeConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source with all three objects populated.
    pub fn cluster(platform: &str, domain: &str, version: &str) -> Self {
        Self::new()
            .with(
                ConfigObject::Infrastructure,
                json!({ "status": { "platform": platform } }),
            )
            .with(ConfigObject::Ingress, json!({ "spec": { "domain": domain } }))
            .with(
                ConfigObject::ClusterVersion,
                json!({ "status": { "desired": { "version": version } } }),
            )
    }

    pub fn with(mut self, object: ConfigObject, value: Value) -> Self {
        self.objects.insert(object, value);
        self
    }

    pub fn without(mut self, object: ConfigObject) -> Self {
        self.objects.remove(&object);
        self
    }
}

#[async_trait]
impl ClusterConfigSource for FakeConfigSource {
    async fn fetch(&self, object: ConfigObject) -> anyhow::Result<Value> {
        self.objects
            .get(&object)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} \"{}\" not found", object.plural(), object.name()))
    }
}

/// Command runner emulating the NAT table's `-C`/`-A` semantics.
#[derive(Debug, Default, Clone)]
pub struct FakeFirewall {
    inner: Arc<Mutex<FakeFirewallState>>,
}

#[derive(Debug, Default)]
struct FakeFirewallState {
    rules: Vec<(String, Vec<String>)>,
    calls: Vec<(String, Vec<String>)>,
    check_exit_override: Option<i32>,
    append_exit_override: Option<i32>,
    spawn_error: bool,
}

impl FakeFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every `-C` to exit with `code`
    pub fn failing_check(self, code: i32) -> Self {
        self.state().check_exit_override = Some(code);
        self
    }

    /// Force every `-A` to exit with `code`
    pub fn failing_append(self, code: i32) -> Self {
        self.state().append_exit_override = Some(code);
        self
    }

    /// Fail to spawn any program
    pub fn missing_binary(self) -> Self {
        self.state().spawn_error = true;
        self
    }

    /// Installed rules as `(program, rule spec without the op flag)`
    pub fn rules(&self) -> Vec<(String, Vec<String>)> {
        self.state().rules.clone()
    }

    /// Every invocation, in order
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.state().calls.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeFirewallState> {
        self.inner.lock().expect("fake firewall lock poisoned")
    }
}

fn without_op(args: &[String]) -> (Option<String>, Vec<String>) {
    let mut op = None;
    let mut spec = Vec::with_capacity(args.len());
    for arg in args {
        if op.is_none() && (arg == "-C" || arg == "-A") {
            op = Some(arg.clone());
        } else {
            spec.push(arg.clone());
        }
    }
    (op, spec)
}

fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl CommandRunner for FakeFirewall {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut state = self.state();
        state.calls.push((program.to_string(), args.to_vec()));
        if state.spawn_error {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
        }

        let (op, spec) = without_op(args);
        let entry = (program.to_string(), spec);
        match op.as_deref() {
            Some("-C") => {
                if let Some(code) = state.check_exit_override {
                    return Ok(exit(code, "iptables: Permission denied"));
                }
                if state.rules.contains(&entry) {
                    Ok(exit(0, ""))
                } else {
                    Ok(exit(1, "iptables: Bad rule (does a matching rule exist in that chain?)."))
                }
            }
            Some("-A") => {
                if let Some(code) = state.append_exit_override {
                    return Ok(exit(code, "iptables: Table does not exist"));
                }
                state.rules.push(entry);
                Ok(exit(0, ""))
            }
            _ => Ok(exit(2, "unknown operation")),
        }
    }
}

/// Applier keeping the latest document per `(kind, name)`, like server-side apply.
#[derive(Debug, Default, Clone)]
pub struct RecordingApplier {
    inner: Arc<Mutex<RecordingApplierState>>,
}

#[derive(Debug, Default)]
struct RecordingApplierState {
    stored: HashMap<(ManifestKind, String), Value>,
    submissions: Vec<ManifestKind>,
    reject: Option<ManifestKind>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every submission of `kind`
    pub fn rejecting(self, kind: ManifestKind) -> Self {
        self.state().reject = Some(kind);
        self
    }

    /// Stored document for `kind`/`name`
    pub fn stored(&self, kind: ManifestKind, name: &str) -> Option<Value> {
        self.state().stored.get(&(kind, name.to_string())).cloned()
    }

    /// Number of distinct stored documents
    pub fn stored_count(&self) -> usize {
        self.state().stored.len()
    }

    /// Kinds in submission order
    pub fn submissions(&self) -> Vec<ManifestKind> {
        self.state().submissions.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RecordingApplierState> {
        self.inner.lock().expect("recording applier lock poisoned")
    }
}

#[async_trait]
impl ManifestApplier for RecordingApplier {
    async fn apply(&self, kind: ManifestKind, manifest: &Value) -> anyhow::Result<()> {
        let mut state = self.state();
        state.submissions.push(kind);
        if state.reject == Some(kind) {
            anyhow::bail!("admission webhook denied the request");
        }
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("manifest has no metadata.name"))?
            .to_string();
        state.stored.insert((kind, name), manifest.clone());
        Ok(())
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # ACME HTTP-01 Proxy
//!
//! Lets an ACME agent complete HTTP-01 challenges for a cluster's API hostname
//! when that hostname resolves to a different address than the application
//! ingress.
//!
//! ## Overview
//!
//! At startup the proxy:
//!
//! - discovers the API and APPS addresses from the cluster configuration objects
//! - refuses to run on clusters older than 4.17
//! - exits cleanly when both addresses are the same
//! - picks a free listen port and binds it
//! - provisions a port-80 redirect from the API address into that port
//!
//! It then forwards `/.well-known/acme-challenge/*` to the ingress address and
//! answers every other path with 403.
//!
//! ## Modules
//!
//! - [`discovery`] - Cluster endpoint discovery
//! - [`version`] - Minimum cluster version gate
//! - [`port`] - Listen port selection
//! - [`proxy`] - Challenge router and backend forwarder
//! - [`redirect`] - Redirect rule provisioning strategies
//! - [`orchestrator`] - Startup sequencing
//!
//! ## Example
//!
//! ```rust,no_run
//! use acme_http01_proxy::redirect::{machineconfig::render, RedirectRule};
//!
//! let rule = RedirectRule::new("10.0.0.9".parse().unwrap(), 8888);
//! println!("{}", rule.iptables_command());
//! println!("{}", render(&rule).ruleset);
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod errors;
pub mod metrics;
pub mod orchestrator;
pub mod port;
pub mod proxy;
pub mod redirect;
pub mod resolver;
pub mod version;

#[cfg(test)]
mod test_support;

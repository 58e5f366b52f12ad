// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hostname to address resolution.
//!
//! Discovery only ever needs one representative address per hostname. The
//! resolver returns every address it finds and [`resolve`] picks the first one
//! deterministically, logging a warning when the choice was ambiguous.

use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Source of hostname lookups.
///
/// Implemented by [`SystemResolver`] for production and by in-memory fakes in tests.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Look up every address for `hostname`, in resolver order.
    async fn lookup(&self, hostname: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system's resolver configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn lookup(&self, hostname: &str) -> io::Result<Vec<IpAddr>> {
        let mut addresses: Vec<IpAddr> = Vec::new();
        for socket_addr in tokio::net::lookup_host((hostname, 0)).await? {
            let ip = socket_addr.ip();
            if !addresses.contains(&ip) {
                addresses.push(ip);
            }
        }
        Ok(addresses)
    }
}

/// Resolve `hostname` to a single address.
///
/// Takes the first address the resolver returns. When there is more than one,
/// the alternatives are logged and dropped.
///
/// # Errors
///
/// Returns an error if the lookup fails or yields no addresses.
pub async fn resolve<R>(resolver: &R, hostname: &str) -> io::Result<IpAddr>
where
    R: AddressResolver + ?Sized,
{
    let addresses = resolver.lookup(hostname).await?;
    debug!(hostname, ?addresses, "Resolved hostname");

    let Some(first) = addresses.first().copied() else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {hostname}"),
        ));
    };

    if addresses.len() > 1 {
        warn!(
            hostname,
            selected = %first,
            ignored = ?&addresses[1..],
            "Hostname resolved to multiple addresses, using the first"
        );
    }

    Ok(first)
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;

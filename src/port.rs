// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Listen port selection.
//!
//! Each candidate is tried by binding and immediately releasing it. The check
//! is only a hint: another process can take the port before the proxy listener
//! binds it, in which case the later bind fails with
//! [`ProxyError::ListenFailed`].

use crate::errors::{ProxyError, Result};
use std::net::{IpAddr, SocketAddr, TcpListener};
use tracing::debug;

/// Return the first candidate port that can currently be bound on `bind_ip`.
///
/// # Errors
///
/// Returns [`ProxyError::NoPortAvailable`] when every candidate is taken.
pub fn select_port(bind_ip: IpAddr, candidates: &[u16]) -> Result<u16> {
    for &port in candidates {
        match try_bind(SocketAddr::new(bind_ip, port)) {
            Ok(()) => {
                debug!(port, "Selected proxy port");
                return Ok(port);
            }
            Err(e) => debug!(port, error = %e, "Candidate port unavailable"),
        }
    }

    Err(ProxyError::NoPortAvailable {
        candidates: candidates.to_vec(),
    })
}

fn try_bind(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    drop(listener);
    Ok(())
}

#[cfg(test)]
#[path = "port_tests.rs"]
mod port_tests;

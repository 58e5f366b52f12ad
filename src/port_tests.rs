// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `port.rs`

#[cfg(test)]
mod tests {
    use super::super::select_port;
    use crate::errors::ProxyError;
    use std::net::{IpAddr, Ipv4Addr, TcpListener};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Bind an ephemeral port and keep it occupied for the life of the listener
    fn occupy() -> (TcpListener, u16) {
        let listener = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Find a port that is free right now
    fn free_port() -> u16 {
        let (listener, port) = occupy();
        drop(listener);
        port
    }

    #[test]
    fn test_selects_first_free_candidate() {
        let free = free_port();

        assert_eq!(select_port(LOCALHOST, &[free]).unwrap(), free);
    }

    #[test]
    fn test_skips_occupied_candidates_in_order() {
        let (_first, occupied_a) = occupy();
        let (_second, occupied_b) = occupy();
        let free = free_port();

        let selected = select_port(LOCALHOST, &[occupied_a, occupied_b, free]).unwrap();

        assert_eq!(selected, free);
    }

    #[test]
    fn test_all_occupied_is_no_port_available() {
        let (_first, occupied_a) = occupy();
        let (_second, occupied_b) = occupy();

        let err = select_port(LOCALHOST, &[occupied_a, occupied_b]).unwrap_err();

        assert_eq!(
            err,
            ProxyError::NoPortAvailable {
                candidates: vec![occupied_a, occupied_b],
            }
        );
    }

    #[test]
    fn test_empty_candidate_list_is_no_port_available() {
        assert!(matches!(
            select_port(LOCALHOST, &[]),
            Err(ProxyError::NoPortAvailable { .. })
        ));
    }

    #[test]
    fn test_selection_releases_the_port() {
        let free = free_port();

        select_port(LOCALHOST, &[free]).unwrap();

        // Selection must not keep the port bound
        TcpListener::bind((LOCALHOST, free)).unwrap();
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::Cli;
    use crate::redirect::ProvisionMode;
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["acme-http01-proxy"]).unwrap();

        assert_eq!(cli, Cli::default());
        assert_eq!(cli.ports, vec![8888, 8889, 8890, 8891, 8892]);
        assert_eq!(cli.bind_address.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_explicit_flags() {
        let cli = Cli::try_parse_from([
            "acme-http01-proxy",
            "--mode",
            "machine-config",
            "--ports",
            "9000,9001",
            "--bind-address",
            "127.0.0.1",
            "--skip-version-check",
            "--metrics-port",
            "9090",
            "--iptables-path",
            "/usr/sbin/iptables",
        ])
        .unwrap();

        assert_eq!(cli.mode, ProvisionMode::MachineConfig);
        assert_eq!(cli.ports, vec![9000, 9001]);
        assert_eq!(cli.bind_address.to_string(), "127.0.0.1");
        assert!(cli.skip_version_check);
        assert_eq!(cli.metrics_port, Some(9090));
        assert_eq!(cli.iptables_path, "/usr/sbin/iptables");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["acme-http01-proxy", "--mode", "nft"]).is_err());
        assert!(Cli::try_parse_from(["acme-http01-proxy", "--ports", "0"]).is_err());
        assert!(Cli::try_parse_from(["acme-http01-proxy", "--ports", "70000"]).is_err());
        assert!(Cli::try_parse_from(["acme-http01-proxy", "--bind-address", "localhost"]).is_err());
    }
}

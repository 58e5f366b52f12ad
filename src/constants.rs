// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the HTTP-01 proxy.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Cluster Configuration API Constants
// ============================================================================

/// API group of the cluster-wide configuration objects
pub const CONFIG_API_GROUP: &str = "config.openshift.io";

/// API version of the cluster-wide configuration objects
pub const CONFIG_API_VERSION: &str = "v1";

/// Kind and plural of the infrastructure object
pub const KIND_INFRASTRUCTURE: &str = "Infrastructure";
pub const PLURAL_INFRASTRUCTURES: &str = "infrastructures";

/// Kind and plural of the ingress configuration object
pub const KIND_INGRESS: &str = "Ingress";
pub const PLURAL_INGRESSES: &str = "ingresses";

/// Kind and plural of the cluster version object
pub const KIND_CLUSTER_VERSION: &str = "ClusterVersion";
pub const PLURAL_CLUSTER_VERSIONS: &str = "clusterversions";

/// Singleton name of the infrastructure and ingress objects
pub const CLUSTER_SINGLETON_NAME: &str = "cluster";

/// Singleton name of the cluster version object
pub const CLUSTER_VERSION_SINGLETON_NAME: &str = "version";

// ============================================================================
// Discovery Constants
// ============================================================================

/// Label that replaces the leading label of the ingress domain to form the API hostname
pub const API_HOSTNAME_LABEL: &str = "api";

/// Leading label expected on the ingress domain
pub const APPS_DOMAIN_LABEL: &str = "apps";

/// Prefix used to build a synthetic hostname under the wildcard ingress record
pub const APPS_LOOKUP_PREFIX: &str = "test.";

// ============================================================================
// Version Gate Constants
// ============================================================================

/// Only this major version is supported
pub const SUPPORTED_MAJOR_VERSION: u64 = 4;

/// Minor versions strictly greater than this are supported (4.17+)
pub const MIN_EXCLUDED_MINOR_VERSION: u64 = 16;

/// Minimum number of dot-separated version components (X.Y.Z)
pub const MIN_VERSION_COMPONENTS: usize = 3;

// ============================================================================
// Proxy Constants
// ============================================================================

/// Path prefix of ACME HTTP-01 challenges
pub const ACME_CHALLENGE_PATH_PATTERN: &str = r"^/\.well-known/acme-challenge/.*";

/// Port the ingress VIP serves plain HTTP on
pub const BACKEND_HTTP_PORT: u16 = 80;

/// Header attached to every forwarded request
pub const PROXY_MARKER_HEADER: &str = "x-proxy-server";

/// Value of [`PROXY_MARKER_HEADER`]
pub const PROXY_MARKER_VALUE: &str = "cert-mgt-http01-proxy";

/// Body returned for any path outside the challenge namespace
pub const FORBIDDEN_BODY: &str = "Forbidden: Only /.well-known/acme-challenge/* is allowed";

/// Body returned when the backend cannot be reached
pub const BACKEND_UNAVAILABLE_BODY: &str = "Backend unavailable";

/// Body returned when the inbound request body cannot be buffered
pub const PAYLOAD_TOO_LARGE_BODY: &str = "Request body too large";

/// Largest inbound request body that is buffered for forwarding (1 MiB)
pub const MAX_FORWARD_BODY_BYTES: usize = 1024 * 1024;

/// Default ordered list of candidate listen ports
pub const DEFAULT_CANDIDATE_PORTS: &[u16] = &[8888, 8889, 8890, 8891, 8892];

/// Default bind address for the port check and the listener
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

// ============================================================================
// Redirect Rule Constants
// ============================================================================

/// Inbound port whose traffic is redirected into the proxy
pub const REDIRECT_SOURCE_PORT: u16 = 80;

/// Default iptables executable
pub const DEFAULT_IPTABLES_PATH: &str = "iptables";

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "cert-mgr-htt01-proxy";

/// nftables table owning the redirect chain
pub const NFT_TABLE_NAME: &str = "crtmgr_proxy_table";

/// nftables chain holding the redirect rule
pub const NFT_CHAIN_NAME: &str = "crtmgr_proxy_PREROUTING";

/// Path of the nftables ruleset on each node
pub const NFT_CONFIG_PATH: &str = "/etc/sysconfig/nftables.conf";

/// systemd unit loading the ruleset
pub const NFT_SERVICE_NAME: &str = "nftables.service";

/// Name of the rendered `MachineConfig`
pub const MACHINE_CONFIG_NAME: &str = "98-nftables-crtmgr-proxy";

/// Node role the `MachineConfig` targets
pub const MACHINE_CONFIG_ROLE: &str = "master";

/// Label key selecting the node role
pub const MACHINE_CONFIG_ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";

/// Ignition spec version embedded in the `MachineConfig`
pub const IGNITION_VERSION: &str = "3.4.0";

/// File mode of the ruleset (0600)
pub const NFT_CONFIG_FILE_MODE: u32 = 384;

/// API group/version/kind/plural of `MachineConfig`
pub const MACHINE_CONFIG_GROUP: &str = "machineconfiguration.openshift.io";
pub const MACHINE_CONFIG_VERSION: &str = "v1";
pub const KIND_MACHINE_CONFIG: &str = "MachineConfig";
pub const PLURAL_MACHINE_CONFIGS: &str = "machineconfigs";

/// API group/version/kind/plural of `MachineConfiguration`
pub const MACHINE_CONFIGURATION_GROUP: &str = "operator.openshift.io";
pub const MACHINE_CONFIGURATION_VERSION: &str = "v1";
pub const KIND_MACHINE_CONFIGURATION: &str = "MachineConfiguration";
pub const PLURAL_MACHINE_CONFIGURATIONS: &str = "machineconfigurations";

/// Singleton name of the `MachineConfiguration`
pub const MACHINE_CONFIGURATION_NAME: &str = "cluster";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

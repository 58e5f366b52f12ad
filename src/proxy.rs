// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! ACME HTTP-01 challenge router.
//!
//! Every inbound request lands in a single catch-all handler that makes a
//! binary decision:
//!
//! - path matches `^/\.well-known/acme-challenge/.*` → forwarded once to the
//!   ingress backend with method, path, query and body intact, the original
//!   `Host` header preserved and `X-Proxy-Server` attached
//! - anything else → `403` with a fixed plain-text body, no backend contact
//!
//! A backend that cannot be reached yields `502` with a fixed body. There is no
//! retry; the ACME client's own validation retries cover that.
//!
//! # Example
//!
//! ```rust,no_run
//! use acme_http01_proxy::proxy::{backend_client, router, ProxyConfig};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ProxyConfig::for_apps_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 8888)?;
//! let app = router(config, backend_client()?);
//! # Ok(())
//! # }
//! ```

use crate::constants::{
    ACME_CHALLENGE_PATH_PATTERN, BACKEND_HTTP_PORT, BACKEND_UNAVAILABLE_BODY, FORBIDDEN_BODY,
    MAX_FORWARD_BODY_BYTES, PAYLOAD_TOO_LARGE_BODY, PROXY_MARKER_HEADER, PROXY_MARKER_VALUE,
};
use crate::errors::{ProxyError, Result};
use crate::metrics::{record_backend_duration, record_request, RequestOutcome};
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use regex::Regex;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use url::Url;

/// Compiled form of [`ACME_CHALLENGE_PATH_PATTERN`]
static CHALLENGE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(ACME_CHALLENGE_PATH_PATTERN).expect("challenge path pattern is a valid regex")
});

/// Headers that apply to a single connection and are never relayed.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Router configuration, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Backend every allowed request is sent to (`http://<apps>:80`)
    pub backend_base_url: Url,
    /// Port the router listens on
    pub listen_port: u16,
    /// Paths allowed through to the backend
    pub allowed_path_pattern: Regex,
}

impl ProxyConfig {
    /// Configuration forwarding to port 80 of the ingress address.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ListenFailed`] if the address does not form a
    /// valid URL. The router cannot start without a backend, so this is a
    /// startup failure rather than a per-request one.
    pub fn for_apps_address(apps_address: IpAddr, listen_port: u16) -> Result<Self> {
        let backend = SocketAddr::new(apps_address, BACKEND_HTTP_PORT);
        let backend_base_url = parse_backend_url(&format!("http://{backend}"), listen_port)?;
        Ok(Self::with_backend(backend_base_url, listen_port))
    }

    /// Configuration forwarding to an arbitrary backend base URL.
    #[must_use]
    pub fn with_backend(backend_base_url: Url, listen_port: u16) -> Self {
        Self {
            backend_base_url,
            listen_port,
            allowed_path_pattern: CHALLENGE_PATH.clone(),
        }
    }

    /// Whether `path` may be forwarded.
    #[must_use]
    pub fn is_allowed(&self, path: &str) -> bool {
        self.allowed_path_pattern.is_match(path)
    }

    /// Backend URL for an inbound path and optional query.
    ///
    /// The path is normalized the way any URL parser would: `.` and `..`
    /// segments are resolved, including their percent-encoded spellings.
    #[must_use]
    pub fn backend_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.backend_base_url.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }

    /// Backend URL for an inbound request, or `None` when it must be rejected.
    ///
    /// Both the raw path and the normalized outbound path have to match the
    /// allowlist, so `/.well-known/acme-challenge/../../admin` is refused
    /// even though its raw form matches.
    #[must_use]
    pub fn forward_target(&self, path: &str, query: Option<&str>) -> Option<Url> {
        if !self.is_allowed(path) {
            return None;
        }
        let url = self.backend_url(path, query);
        self.is_allowed(url.path()).then_some(url)
    }
}

fn parse_backend_url(raw: &str, listen_port: u16) -> Result<Url> {
    Url::parse(raw).map_err(|e| ProxyError::ListenFailed {
        port: listen_port,
        reason: format!("invalid backend address {raw}: {e}"),
    })
}

#[derive(Clone)]
struct ProxyState {
    config: Arc<ProxyConfig>,
    client: reqwest::Client,
}

/// HTTP client used to dial the backend.
///
/// Picks up `HTTP_PROXY`/`NO_PROXY` from the environment and never follows
/// redirects, so 3xx answers reach the caller unchanged.
///
/// # Errors
///
/// Returns an error if the client cannot be constructed.
pub fn backend_client() -> reqwest::Result<reqwest::Client> {
    backend_client_builder().build()
}

/// Builder behind [`backend_client`], for callers that need to add settings
/// such as an explicit upstream proxy.
#[must_use]
pub fn backend_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder().redirect(reqwest::redirect::Policy::none())
}

/// Build the catch-all challenge router.
pub fn router(config: ProxyConfig, client: reqwest::Client) -> Router {
    let state = ProxyState {
        config: Arc::new(config),
        client,
    };
    Router::new().fallback(handle).with_state(state)
}

/// Bind the listener on the port chosen by the port selector.
///
/// # Errors
///
/// Returns [`ProxyError::ListenFailed`]; the port check is only advisory, so
/// this is the authoritative failure when another process took the port.
pub async fn bind(bind_ip: IpAddr, port: u16) -> Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(bind_ip, port))
        .await
        .map_err(|e| ProxyError::ListenFailed {
            port,
            reason: e.to_string(),
        })
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ProxyError::ListenFailed`] if the server stops with an I/O error.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| ProxyError::ListenFailed {
        port,
        reason: e.to_string(),
    })
}

async fn handle(State(state): State<ProxyState>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let Some(url) = state.config.forward_target(&path, request.uri().query()) else {
        debug!(path = %path, "Rejecting request outside the challenge path");
        record_request(RequestOutcome::Forbidden);
        return plain_text(StatusCode::FORBIDDEN, FORBIDDEN_BODY);
    };

    info!(path = %path, "Forwarding request to APPS VIP");
    let started = Instant::now();
    let result = forward(&state, url, request).await;
    record_backend_duration(started.elapsed());

    match result {
        Ok(response) => {
            record_request(RequestOutcome::Forwarded);
            response
        }
        Err(ForwardError::InboundBody(e)) => {
            debug!(path = %path, error = %e, "Failed to read inbound request body");
            record_request(RequestOutcome::PayloadTooLarge);
            plain_text(StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_BODY)
        }
        Err(ForwardError::Backend(e)) => {
            error!(path = %path, error = %e, "Error handling request");
            record_request(RequestOutcome::BackendError);
            plain_text(StatusCode::BAD_GATEWAY, BACKEND_UNAVAILABLE_BODY)
        }
    }
}

enum ForwardError {
    InboundBody(axum::Error),
    Backend(ProxyError),
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(ProxyError::BackendUnavailable {
            reason: e.to_string(),
        })
    }
}

async fn forward(
    state: &ProxyState,
    url: Url,
    request: Request,
) -> Result<Response, ForwardError> {
    let (parts, body) = request.into_parts();

    let original_host = parts.headers.get(header::HOST).cloned().or_else(|| {
        parts
            .uri
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    });
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut headers = outbound_headers(&parts.headers, original_host, client_ip);
    headers.remove(header::CONTENT_LENGTH);

    let body = to_bytes(body, MAX_FORWARD_BODY_BYTES)
        .await
        .map_err(ForwardError::InboundBody)?;

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let upstream_headers = strip_hop_by_hop(upstream.headers());
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = upstream_headers;
    Ok(response)
}

/// Headers sent to the backend: inbound headers minus hop-by-hop ones, with
/// `Host` set to the original inbound host and the proxy marker attached.
fn outbound_headers(
    inbound: &HeaderMap,
    original_host: Option<HeaderValue>,
    client_ip: Option<IpAddr>,
) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);

    if let Some(host) = original_host {
        headers.insert(header::HOST, host);
    }

    if let Some(ip) = client_ip {
        let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
    }

    headers.insert(
        HeaderName::from_static(PROXY_MARKER_HEADER),
        HeaderValue::from_static(PROXY_MARKER_VALUE),
    );

    headers
}

fn strip_hop_by_hop(source: &HeaderMap) -> HeaderMap {
    // Headers named in Connection are connection-scoped too
    let connection_scoped: Vec<String> = source
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut headers = source.clone();
    for name in HOP_BY_HOP_HEADERS
        .iter()
        .copied()
        .chain(connection_scoped.iter().map(String::as_str))
    {
        headers.remove(name);
    }
    headers
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod proxy_tests;

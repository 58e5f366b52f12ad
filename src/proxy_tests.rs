// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `proxy.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        backend_client_builder, bind, parse_backend_url, router, serve, ProxyConfig,
    };
    use crate::constants::{
        BACKEND_UNAVAILABLE_BODY, FORBIDDEN_BODY, MAX_FORWARD_BODY_BYTES, PAYLOAD_TOO_LARGE_BODY,
        PROXY_MARKER_VALUE,
    };
    use crate::errors::ProxyError;
    use crate::metrics::REQUESTS_TOTAL;
    use reqwest::header::HOST;
    use reqwest::redirect::Policy;
    use reqwest::StatusCode;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use url::Url;
    use wiremock::matchers::{any, body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const API_HOST: &str = "api.cluster1.example.com";

    /// Client that talks to the proxy directly, ignoring any ambient proxy settings
    fn direct_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .redirect(Policy::none())
            .build()
            .unwrap()
    }

    /// Start the challenge router in front of `backend` and return its address
    async fn spawn_proxy(backend: &str) -> SocketAddr {
        spawn_proxy_with_client(backend, direct_client()).await
    }

    async fn spawn_proxy_with_client(backend: &str, client: reqwest::Client) -> SocketAddr {
        let listener = bind(LOCALHOST, 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ProxyConfig::with_backend(Url::parse(backend).unwrap(), addr.port());
        let app = router(config, client);
        tokio::spawn(serve(listener, app, std::future::pending()));
        addr
    }

    /// Send `GET <target>` exactly as written, bypassing client-side URL
    /// normalization, and return the raw response
    async fn raw_get(proxy: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(proxy).await.unwrap();
        let request =
            format!("GET {target} HTTP/1.1\r\nHost: {API_HOST}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    /// A URL nothing is listening on
    async fn unreachable_backend() -> String {
        let listener = tokio::net::TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    #[test]
    fn test_allowed_paths() {
        let config = ProxyConfig::for_apps_address(LOCALHOST, 8888).unwrap();

        assert!(config.is_allowed("/.well-known/acme-challenge/token"));
        assert!(config.is_allowed("/.well-known/acme-challenge/"));
        assert!(config.is_allowed("/.well-known/acme-challenge/a/b"));
    }

    #[test]
    fn test_rejected_paths() {
        let config = ProxyConfig::for_apps_address(LOCALHOST, 8888).unwrap();

        assert!(!config.is_allowed("/"));
        assert!(!config.is_allowed("/.well-known/acme-challenge"));
        assert!(!config.is_allowed("/.WELL-KNOWN/acme-challenge/token"));
        assert!(!config.is_allowed("/.well-known/other/token"));
        assert!(!config.is_allowed("/prefix/.well-known/acme-challenge/token"));
        assert!(!config.is_allowed("/.well-knownXacme-challenge/token"));
    }

    #[test]
    fn test_backend_url_for_apps_address() {
        let ipv4 = ProxyConfig::for_apps_address("10.0.0.5".parse().unwrap(), 8888).unwrap();
        assert_eq!(ipv4.backend_base_url.as_str(), "http://10.0.0.5/");
        assert_eq!(ipv4.listen_port, 8888);
        assert_eq!(
            ipv4.backend_url("/.well-known/acme-challenge/abc", Some("x=1"))
                .as_str(),
            "http://10.0.0.5/.well-known/acme-challenge/abc?x=1"
        );

        let ipv6 = ProxyConfig::for_apps_address("fd00::5".parse().unwrap(), 8888).unwrap();
        assert_eq!(
            ipv6.backend_url("/.well-known/acme-challenge/abc", None)
                .as_str(),
            "http://[fd00::5]/.well-known/acme-challenge/abc"
        );
    }

    #[test]
    fn test_invalid_backend_address_is_startup_failure() {
        let err = parse_backend_url("http://[not-an-address]", 8888).unwrap_err();

        assert!(matches!(err, ProxyError::ListenFailed { port: 8888, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_forward_target_rechecks_normalized_path() {
        let config = ProxyConfig::for_apps_address("10.0.0.5".parse().unwrap(), 8888).unwrap();

        let target = config
            .forward_target("/.well-known/acme-challenge/a/./b", Some("x=1"))
            .unwrap();
        assert_eq!(
            target.as_str(),
            "http://10.0.0.5/.well-known/acme-challenge/a/b?x=1"
        );
        assert!(config
            .forward_target("/.well-known/acme-challenge/sub/../token", None)
            .is_some());

        for escaping in [
            "/.well-known/acme-challenge/../../admin",
            "/.well-known/acme-challenge/%2e%2e/%2e%2e/admin",
            "/.well-known/acme-challenge/%2E%2E/x",
            "/.well-known/acme-challenge/..",
            "/.well-known/acme-challenge/.%2e/",
            "/.well-known/acme-challenge/..\\..\\admin",
            "/",
        ] {
            assert_eq!(config.forward_target(escaping, None), None, "{escaping}");
        }
    }

    #[tokio::test]
    async fn test_challenge_request_is_forwarded() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/.well-known/acme-challenge/token123"))
            .and(query_param("attempt", "1"))
            .and(header("host", API_HOST))
            .and(header("x-proxy-server", PROXY_MARKER_VALUE))
            .and(body_string("payload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("token123.thumbprint"),
            )
            .expect(1)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let response = direct_client()
            .post(format!(
                "http://{proxy}/.well-known/acme-challenge/token123?attempt=1"
            ))
            .header(HOST, API_HOST)
            .body("payload")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "token123.thumbprint");
    }

    #[tokio::test]
    async fn test_forwarded_request_carries_client_address() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-forwarded-for", "127.0.0.1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let response = direct_client()
            .get(format!("http://{proxy}/.well-known/acme-challenge/t"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_backend_status_is_relayed() {
        let backend = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(404).set_body_string("no such token"))
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let response = direct_client()
            .get(format!("http://{proxy}/.well-known/acme-challenge/missing"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "no such token");
    }

    #[tokio::test]
    async fn test_backend_redirect_is_not_followed() {
        let backend = MockServer::start().await;
        Mock::given(path("/.well-known/acme-challenge/moved"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "https://elsewhere.example.com/"),
            )
            .expect(1)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let response = direct_client()
            .get(format!("http://{proxy}/.well-known/acme-challenge/moved"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "https://elsewhere.example.com/"
        );
    }

    #[tokio::test]
    async fn test_non_challenge_paths_are_forbidden_without_backend_contact() {
        let backend = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let client = direct_client();

        for forbidden in [
            "/",
            "/api/v1/namespaces",
            "/.well-known/acme-challenge",
            "/.WELL-KNOWN/acme-challenge/token",
        ] {
            let response = client
                .get(format!("http://{proxy}{forbidden}"))
                .send()
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::FORBIDDEN, "path {forbidden}");
            assert_eq!(response.text().await.unwrap(), FORBIDDEN_BODY);
        }
    }

    #[tokio::test]
    async fn test_dot_segments_cannot_escape_the_challenge_path() {
        let backend = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("admin console"))
            .expect(0)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;

        for target in [
            "/.well-known/acme-challenge/../../admin",
            "/.well-known/acme-challenge/%2e%2e/%2e%2e/admin",
        ] {
            let response = raw_get(proxy, target).await;

            assert!(response.starts_with("HTTP/1.1 403"), "{target}: {response}");
            assert!(response.ends_with(FORBIDDEN_BODY), "{target}: {response}");
        }
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_and_counted() {
        let backend = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let proxy = spawn_proxy(&backend.uri()).await;
        let before = REQUESTS_TOTAL
            .with_label_values(&["payload_too_large"])
            .get();

        let response = direct_client()
            .post(format!("http://{proxy}/.well-known/acme-challenge/token"))
            .body(vec![b'a'; MAX_FORWARD_BODY_BYTES + 1])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.text().await.unwrap(), PAYLOAD_TOO_LARGE_BODY);
        let after = REQUESTS_TOTAL
            .with_label_values(&["payload_too_large"])
            .get();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_backend_client_honors_upstream_proxy() {
        // Absolute-form requests reach the mock with their target path intact
        let upstream_proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/acme-challenge/token"))
            .and(header("host", API_HOST))
            .and(header("x-proxy-server", PROXY_MARKER_VALUE))
            .respond_with(ResponseTemplate::new(200).set_body_string("via upstream proxy"))
            .expect(1)
            .mount(&upstream_proxy)
            .await;

        let client = backend_client_builder()
            .proxy(reqwest::Proxy::http(upstream_proxy.uri()).unwrap())
            .build()
            .unwrap();
        // TEST-NET-1, never dialed directly
        let proxy = spawn_proxy_with_client("http://192.0.2.1", client).await;

        let response = direct_client()
            .get(format!("http://{proxy}/.well-known/acme-challenge/token"))
            .header(HOST, API_HOST)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "via upstream proxy");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let proxy = spawn_proxy(&unreachable_backend().await).await;
        let client = direct_client();

        let response = client
            .get(format!("http://{proxy}/.well-known/acme-challenge/token"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.text().await.unwrap(), BACKEND_UNAVAILABLE_BODY);

        // A failed forward does not affect later requests
        let response = client
            .get(format!("http://{proxy}/index.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.text().await.unwrap(), FORBIDDEN_BODY);
    }

    #[tokio::test]
    async fn test_bind_occupied_port_is_listen_failed() {
        let occupied = tokio::net::TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = bind(LOCALHOST, port).await.unwrap_err();

        assert!(matches!(err, ProxyError::ListenFailed { port: p, .. } if p == port));
    }
}

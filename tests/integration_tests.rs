//! Integration tests against a real listener.
//!
//! Each test starts the application on an ephemeral port with
//! `into_make_service_with_connect_info`, so client identity is resolved from
//! the actual TCP peer (`127.0.0.1`) and the trusted proxy rules apply.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use gatehouse::middleware::StaticCredentialResolver;
use gatehouse::{AppState, Config, build_router};

/// Test fixture that owns a running server.
struct TestFixture {
    base_url: String,
    client: Client,
    state: AppState,
    stop: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl TestFixture {
    async fn new(config: Config) -> Self {
        let state = AppState::new(config, Arc::new(StaticCredentialResolver::with_demo_users()))
            .expect("valid config");
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = stopped.await;
            })
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            state,
            stop: Some(stop),
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put_user(&self, id: u32, token: &str, forwarded_for: Option<&str>) -> StatusCode {
        let mut request = self
            .client
            .put(self.url(&format!("/user/{id}")))
            .bearer_auth(token);
        if let Some(ip) = forwarded_for {
            request = request.header("x-forwarded-for", ip);
        }
        request.send().await.expect("PUT failed").status()
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.server.await.expect("Server task panicked");
        self.state.shutdown().await;
    }
}

fn limited(max_requests: usize, trusted_proxies: &[&str]) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        rate_limit_max_requests: max_requests,
        trusted_proxies: trusted_proxies.iter().map(|p| p.to_string()).collect(),
        ..Config::default()
    }
}

// ============================================================================
// Health & Status Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new(limited(10, &[])).await;

    let response = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .expect("Health request failed");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rate_limiting"], true);
    assert!(body.get("version").is_some());
    assert!(body.get("timestamp").is_some());

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_readiness_and_stats() {
    let fixture = TestFixture::new(limited(10, &[])).await;

    let response = fixture
        .client
        .get(fixture.url("/ready"))
        .send()
        .await
        .expect("Readiness request failed");
    assert_eq!(response.status(), StatusCode::OK);

    fixture.put_user(123, "valid-token-123", None).await;

    let stats: Value = fixture
        .client
        .get(fixture.url("/stats"))
        .send()
        .await
        .expect("Stats request failed")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(stats["tracked_visitors"], 1);
    assert_eq!(stats["max_requests"], 10);
    assert_eq!(stats["window_secs"], 60);

    fixture.shutdown().await;
}

// ============================================================================
// User Flow Tests
// ============================================================================

#[tokio::test]
async fn test_login_then_update() {
    let fixture = TestFixture::new(limited(10, &[])).await;

    let response = fixture
        .client
        .post(fixture.url("/user/login"))
        .json(&json!({"username": "user123", "password": "password123"}))
        .send()
        .await
        .expect("Login failed");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["user"]["id"], 123);

    let response = fixture
        .client
        .put(fixture.url("/user/123"))
        .bearer_auth(&token)
        .json(&json!({"name": "renamed"}))
        .send()
        .await
        .expect("Update failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "renamed");

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_login_wrong_password() {
    let fixture = TestFixture::new(limited(10, &[])).await;

    let response = fixture
        .client
        .post(fixture.url("/user/login"))
        .json(&json!({"username": "user123", "password": "wrong"}))
        .send()
        .await
        .expect("Login request failed");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    fixture.shutdown().await;
}

// ============================================================================
// Client Identity Tests
// ============================================================================

#[tokio::test]
async fn test_forwarded_header_ignored_from_untrusted_peer() {
    // The loopback peer is not in the trusted range
    let fixture = TestFixture::new(limited(1, &["10.0.0.0/8"])).await;

    assert_eq!(
        fixture
            .put_user(123, "valid-token-123", Some("1.1.1.1"))
            .await,
        StatusCode::OK
    );
    // A different spoofed address still maps to the same peer identity
    assert_eq!(
        fixture
            .put_user(123, "valid-token-123", Some("2.2.2.2"))
            .await,
        StatusCode::TOO_MANY_REQUESTS
    );

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_forwarded_header_honored_from_trusted_peer() {
    let fixture = TestFixture::new(limited(1, &["127.0.0.0/8", "::1/128"])).await;

    for ip in ["1.1.1.1", "2.2.2.2"] {
        assert_eq!(
            fixture.put_user(123, "valid-token-123", Some(ip)).await,
            StatusCode::OK
        );
    }
    assert_eq!(
        fixture
            .put_user(123, "valid-token-123", Some("1.1.1.1"))
            .await,
        StatusCode::TOO_MANY_REQUESTS
    );

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_eviction_task() {
    let fixture = TestFixture::new(limited(5, &[])).await;
    let state = fixture.state.clone();
    assert!(state.is_ready());

    fixture.shutdown().await;
    assert!(!state.is_ready());
}

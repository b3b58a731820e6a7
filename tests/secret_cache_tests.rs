//! Secret cache against a mocked Secret Manager endpoint

use std::sync::Arc;
use std::time::Duration;

use mcp_authguard::Error;
use mcp_authguard::clock::ManualClock;
use mcp_authguard::config::{ExecutionMode, SecretBackendKind, SecretConfig};
use mcp_authguard::identity::StaticTokenProvider;
use mcp_authguard::secrets::{SecretCache, SecretValue};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCESS_PATH: &str = "/v1/projects/acme/secrets/db-password/versions/latest:access";

fn config(server: &MockServer, ttl: u64) -> SecretConfig {
    SecretConfig {
        backend: SecretBackendKind::SecretManager,
        vault_project_id: Some("acme".to_string()),
        vault_endpoint: server.uri(),
        cache_ttl_seconds: ttl,
        timeout: Duration::from_secs(2),
    }
}

fn cache(server: &MockServer, ttl: u64, clock: Arc<ManualClock>) -> SecretCache {
    SecretCache::from_config(
        &config(server, ttl),
        ExecutionMode::Production,
        Arc::new(StaticTokenProvider::new(SecretValue::new("ya29.vault"))),
        clock,
    )
    .unwrap()
}

fn payload(value: &str) -> ResponseTemplate {
    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD.encode(value);
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "payload": { "data": data } }))
}

/// One backend call serves every read inside the TTL
#[tokio::test]
async fn test_cached_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .and(header("authorization", "Bearer ya29.vault"))
        .respond_with(payload("hunter2"))
        .expect(1)
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::starting_now());
    let cache = cache(&server, 300, clock.clone());

    for _ in 0..5 {
        assert_eq!(cache.get("db-password").await.unwrap().expose_secret(), "hunter2");
        clock.advance(Duration::from_secs(60));
    }
}

/// TTL of zero hits the backend on every call
#[tokio::test]
async fn test_zero_ttl_always_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .respond_with(payload("hunter2"))
        .expect(2)
        .mount(&server)
        .await;

    let cache = cache(&server, 0, Arc::new(ManualClock::starting_now()));
    cache.get("db-password").await.unwrap();
    cache.get("db-password").await.unwrap();
}

/// After expiry a failing backend is an error, never the stale value
#[tokio::test]
async fn test_no_stale_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .respond_with(payload("hunter2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::starting_now());
    let cache = cache(&server, 10, clock.clone());

    cache.get("db-password").await.unwrap();
    clock.advance(Duration::from_secs(11));

    let err = cache.get("db-password").await.unwrap_err();
    assert!(matches!(err, Error::SecretRetrieval { .. }));
    assert!(!err.to_string().contains("hunter2"));
}

/// Unknown secrets surface as not found
#[tokio::test]
async fn test_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = cache(&server, 300, Arc::new(ManualClock::starting_now()));
    assert!(matches!(
        cache.get("missing").await,
        Err(Error::SecretNotFound(_))
    ));
}

/// Invalidation forces the next read to the backend
#[tokio::test]
async fn test_invalidate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .respond_with(payload("rotated"))
        .expect(2)
        .mount(&server)
        .await;

    let cache = cache(&server, 300, Arc::new(ManualClock::starting_now()));
    cache.get("db-password").await.unwrap();
    cache.invalidate("db-password");
    cache.get("db-password").await.unwrap();
    cache.clear();
    assert!(cache.is_empty());
}

/// Vault backend without a project is rejected before any request
#[test]
fn test_project_required() {
    let config = SecretConfig {
        backend: SecretBackendKind::SecretManager,
        vault_project_id: Some("   ".to_string()),
        ..SecretConfig::default()
    };
    let result = SecretCache::from_config(
        &config,
        ExecutionMode::Production,
        Arc::new(StaticTokenProvider::new(SecretValue::new("t"))),
        Arc::new(ManualClock::starting_now()),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

/// Binary payloads are rejected rather than coerced into text
#[tokio::test]
async fn test_binary_payload_rejected() {
    use base64::Engine;

    let server = MockServer::start().await;
    let data = base64::engine::general_purpose::STANDARD.encode([48u8, 130, 255, 254, 0, 156]);
    Mock::given(method("GET"))
        .and(path(ACCESS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "payload": { "data": data } })),
        )
        .mount(&server)
        .await;

    let cache = cache(&server, 300, Arc::new(ManualClock::starting_now()));
    let err = cache.get("db-password").await.unwrap_err();
    assert!(matches!(err, Error::SecretRetrieval { .. }));
    assert!(cache.is_empty());
}

/// The vault endpoint receives the ambient credential, so it gets the
/// same transport rules as verifier endpoints
#[test]
fn test_vault_endpoint_transport() {
    let config = SecretConfig {
        backend: SecretBackendKind::SecretManager,
        vault_project_id: Some("acme".to_string()),
        vault_endpoint: "http://vault.attacker.example".to_string(),
        ..SecretConfig::default()
    };
    let build = |mode| {
        SecretCache::from_config(
            &config,
            mode,
            Arc::new(StaticTokenProvider::new(SecretValue::new("t"))),
            Arc::new(ManualClock::starting_now()),
        )
    };

    assert!(matches!(build(ExecutionMode::Production), Err(Error::Config(_))));
    assert!(build(ExecutionMode::Development).is_ok());
}

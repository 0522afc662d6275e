//! Key-rotation behavior of the certificate cache and validator:
//! the refresh floor, the retry-once protocol, and failed-fetch fallback.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fedauth::error::{AuthError, ProviderName};
use fedauth::services::{CertCache, TokenValidator, ValidationParams};

fn jwks_without(kid: &str) -> serde_json::Value {
    assert_ne!(kid, "stable-key");
    serde_json::json!({
        "keys": [
            {"kty": "RSA", "kid": "stable-key", "alg": "RS256", "n": "AQAB", "e": "AQAB"}
        ]
    })
}

/// A structurally valid JWT naming `kid`; the signature is garbage, which is
/// fine for tests that only exercise key lookup.
fn token_with_kid(kid: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"RS256","kid":"{kid}"}}"#));
    let claims = URL_SAFE_NO_PAD.encode(r#"{"sub":"s","iss":"i","aud":"a","exp":4100000000}"#);
    let signature = URL_SAFE_NO_PAD.encode("not-a-signature");
    format!("{header}.{claims}.{signature}")
}

fn cache(server: &MockServer, floor: Duration) -> CertCache {
    CertCache::new(
        ProviderName::Google,
        format!("{}/certs", server.uri()),
        floor,
        reqwest::Client::new(),
    )
}

fn params() -> ValidationParams {
    ValidationParams {
        issuers: vec!["i".to_string()],
        audience: "a".to_string(),
    }
}

#[tokio::test]
async fn cache_is_reused_until_forced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("other")))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::from_secs(300));
    for _ in 0..3 {
        let keys = cache.get(false).await.unwrap();
        assert!(keys.find("stable-key").is_some());
    }
}

#[tokio::test]
async fn forced_refresh_within_floor_is_suppressed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("other")))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::from_secs(300));
    cache.get(false).await.unwrap();
    // Forced, but inside the floor: served from cache, no second fetch.
    cache.get(true).await.unwrap();
}

#[tokio::test]
async fn forced_refresh_after_floor_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("other")))
        .expect(2)
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::ZERO);
    cache.get(false).await.unwrap();
    cache.get(true).await.unwrap();
}

#[tokio::test]
async fn failed_refresh_leaves_previous_cache_intact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("other")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::ZERO);
    cache.get(false).await.unwrap();

    let err = cache.get(true).await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderError { .. }));

    // The stale-but-valid key set is still served.
    let keys = cache.get(false).await.unwrap();
    assert!(keys.find("stable-key").is_some());
}

#[tokio::test]
async fn validator_refreshes_exactly_once_for_unknown_kid() {
    let server = MockServer::start().await;
    // The rotated key never shows up; the validator must fetch exactly
    // twice (initial fill plus one forced refresh) and then give up.
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("rotated-key")))
        .expect(2)
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::ZERO);
    let validator = TokenValidator::new();
    let err = validator
        .validate(&cache, &token_with_kid("rotated-key"), &params())
        .await
        .unwrap_err();
    match err {
        AuthError::TokenValidation { reason } => {
            assert!(reason.contains("after refresh"), "unexpected reason: {reason}");
        }
        other => panic!("expected TokenValidation, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_fetch_respects_refresh_floor() {
    let server = MockServer::start().await;
    // With the floor in force, the retry cannot trigger a second fetch.
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_without("rotated-key")))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::from_secs(300));
    let validator = TokenValidator::new();
    let err = validator
        .validate(&cache, &token_with_kid("rotated-key"), &params())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenValidation { .. }));
}

#[tokio::test]
async fn oversized_key_document_is_rejected() {
    let server = MockServer::start().await;
    let huge = format!(
        r#"{{"keys": [{{"kty": "RSA", "kid": "k", "n": "{}", "e": "AQAB"}}]}}"#,
        "A".repeat(600 * 1024)
    );
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(huge))
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::ZERO);
    let err = cache.get(false).await.unwrap_err();
    match err {
        AuthError::ProviderError { reason, .. } => assert!(reason.contains("too large")),
        other => panic!("expected ProviderError, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_key_document_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let cache = cache(&server, Duration::ZERO);
    let err = cache.get(false).await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderError { .. }));
}

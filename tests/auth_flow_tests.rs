//! End-to-end authentication tests through the router
//!
//! Covers:
//! - Local API key lookup
//! - Gateway header trust
//! - Bypass paths
//! - Both schemes stacked
//! - Local JWT verification
//! - Unresolved secret references

mod common;

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use jsonwebtoken::{EncodingKey, Header, encode};
use pretty_assertions::assert_eq;
use serde_json::json;

use authgate::config::{ApiKeyAuthConfig, Config, JwtAuthConfig, JwtLocalConfig, VerificationMode};
use authgate::server::AuthServer;
use common::{get, router};

const JWT_SECRET: &str = "integration-secret";

fn local_api_key_config() -> Config {
    let mut config = Config::default();
    config.auth.api_key = ApiKeyAuthConfig {
        enabled: true,
        keys: [("abc123".to_string(), "tenantA".to_string())].into(),
        ..Default::default()
    };
    config
}

fn local_jwt_config() -> JwtAuthConfig {
    JwtAuthConfig {
        enabled: true,
        local: JwtLocalConfig {
            secret: Some(JWT_SECRET.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn sign(claims: &serde_json::Value) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn exp_in(seconds: u64) -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + seconds
}

#[tokio::test]
async fn local_api_key_forwards_with_group() {
    let app = router(local_api_key_config());

    let (status, body) = get(&app, "/whoami", &[("X-API-Key", "abc123")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "authenticated": true,
            "context": {"scheme": "api_key", "group_id": "tenantA"}
        })
    );
}

#[tokio::test]
async fn local_api_key_rejects_unknown_key() {
    let app = router(local_api_key_config());

    let (status, body) = get(&app, "/whoami", &[("X-API-Key", "wrong")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Unauthorized", "message": "Invalid API key"}));
}

#[tokio::test]
async fn missing_api_key_names_header() {
    let app = router(local_api_key_config());

    let (status, body) = get(&app, "/whoami", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing API key header: X-API-Key");
}

#[tokio::test]
async fn gateway_jwt_trusts_identity_headers() {
    let mut config = Config::default();
    config.auth.jwt = JwtAuthConfig {
        enabled: true,
        mode: VerificationMode::Gateway,
        ..Default::default()
    };
    let app = router(config);

    let (status, body) = get(&app, "/whoami", &[("X-Group-Id", "g1"), ("X-User-Id", "u1")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["context"],
        json!({"scheme": "jwt", "group_id": "g1", "user_id": "u1"})
    );

    let (status, body) = get(&app, "/whoami", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing identity headers from gateway");
}

#[tokio::test]
async fn bypass_paths_skip_authentication() {
    let app = router(local_api_key_config());

    let (status, body) = get(&app, "/health", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = get(&app, "/ready", &[]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, "/metrics", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_key"]["enabled"], true);
    // Local mode has no verdict cache
    assert!(body["api_key"]["cache"].is_null());
}

#[tokio::test]
async fn local_jwt_accepts_signed_token() {
    let mut config = Config::default();
    config.auth.jwt = local_jwt_config();
    let app = router(config);

    let token = sign(&json!({"sub": "u9", "group_id": "g9", "exp": exp_in(600)}));
    let bearer = format!("Bearer {token}");
    let (status, body) = get(&app, "/whoami", &[("Authorization", bearer.as_str())]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["context"],
        json!({"scheme": "jwt", "group_id": "g9", "user_id": "u9"})
    );
}

#[tokio::test]
async fn jwt_rejection_carries_bearer_challenge() {
    let mut config = Config::default();
    config.auth.jwt = local_jwt_config();
    let app = AuthServer::new(config).unwrap().router();

    let response = tower::ServiceExt::oneshot(
        app,
        axum::http::Request::builder()
            .uri("/whoami")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
}

#[tokio::test]
async fn stacked_schemes_require_both() {
    let mut config = local_api_key_config();
    config.auth.jwt = local_jwt_config();
    let app = router(config);

    let token = sign(&json!({"sub": "u1", "exp": exp_in(600)}));
    let bearer = format!("Bearer {token}");

    // API key is checked first
    let (status, body) = get(&app, "/whoami", &[("Authorization", bearer.as_str())]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing API key header: X-API-Key");

    let (status, body) = get(&app, "/whoami", &[("X-API-Key", "abc123")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["message"],
        "Missing or malformed Authorization header. Expected: Bearer <token>"
    );

    let (status, body) = get(
        &app,
        "/whoami",
        &[("X-API-Key", "abc123"), ("Authorization", bearer.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["scheme"], "jwt");
}

#[tokio::test]
async fn shut_down_server_rejects_and_reports_not_ready() {
    let server = AuthServer::new(local_api_key_config()).unwrap();
    let app = server.router();
    server.state().shutdown();

    let (status, body) = get(&app, "/whoami", &[("X-API-Key", "abc123")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication service unavailable");

    let (status, _) = get(&app, "/ready", &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn no_schemes_forwards_anonymously() {
    let app = router(Config::default());
    let (status, body) = get(&app, "/whoami", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"authenticated": false}));
}

#[tokio::test]
async fn gateway_api_key_reads_group_header_only() {
    let mut config = Config::default();
    config.auth.api_key = ApiKeyAuthConfig {
        enabled: true,
        mode: VerificationMode::Gateway,
        ..Default::default()
    };
    let app = router(config);

    let (status, body) = get(&app, "/whoami", &[("X-Group-Id", "g1"), ("X-User-Id", "u1")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"], json!({"scheme": "api_key", "group_id": "g1"}));

    // The API key scheme never trusts the user header alone
    let (status, body) = get(&app, "/whoami", &[("X-User-Id", "u1")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing identity headers from gateway");
}

#[test]
fn unresolved_jwt_secret_reference_refuses_to_start() {
    let mut config = Config::default();
    config.auth.jwt = JwtAuthConfig {
        enabled: true,
        local: JwtLocalConfig {
            secret: Some("env:AUTHGATE_IT_UNSET_JWT_SECRET".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let err = AuthServer::new(config).err().unwrap();
    assert!(err.is_config());
}

#[tokio::test]
async fn unresolved_api_key_reference_is_never_a_key() {
    let config = ApiKeyAuthConfig {
        enabled: true,
        keys: [("env:AUTHGATE_IT_UNSET_API_KEY".to_string(), "tenantA".to_string())].into(),
        ..Default::default()
    };
    assert!(config.validate().is_err());

    // Even a guard built without validation does not accept the reference text
    let verifier = authgate::auth::ApiKeyVerifier::new(
        &config,
        authgate::auth::HttpClient::shared(reqwest::Client::new()),
    )
    .unwrap();
    let guard = authgate::auth::AuthGuard::new(verifier, Vec::new());
    let mut headers = axum::http::HeaderMap::new();
    headers.insert("x-api-key", "env:AUTHGATE_IT_UNSET_API_KEY".parse().unwrap());

    let result = guard.authenticate(&headers).await;
    assert!(!result.is_valid());
}

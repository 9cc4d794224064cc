//! Token refresh flow against a mock backend.

use std::collections::HashSet;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use dragoman_accounts::{AccountError, AccountPool};
use dragoman_config::{ConfigStore, GatewayConfig};
use dragoman_types::Credential;
use dragoman_upstream::UpstreamClient;

fn token_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#).as_bytes());
    format!("{header}.{payload}.sig")
}

fn seed(email: &str, token: Option<String>) -> Credential {
    Credential {
        email: Some(email.to_string()),
        password: "pw".to_string(),
        token,
        ..Credential::default()
    }
}

async fn mock_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v0/users/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"biz_data": {"user": {"token": token}}}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn missing_token_triggers_login_and_config_writeback() {
    let server = MockServer::start().await;
    mock_login(&server, "fresh-token").await;

    let client = UpstreamClient::new().unwrap().with_base_url(server.uri());
    let config = ConfigStore::in_memory(GatewayConfig {
        accounts: vec![seed("a@x", None)],
        ..GatewayConfig::default()
    });
    let pool = AccountPool::new(config.accounts());

    let mut credential = pool.acquire(&HashSet::new()).expect("acquire");
    let token = pool
        .ensure_token(&mut credential, &client, &config)
        .await
        .expect("refresh succeeds");

    assert_eq!(token, "fresh-token");
    assert_eq!(credential.token.as_deref(), Some("fresh-token"));
    assert_eq!(config.accounts()[0].token.as_deref(), Some("fresh-token"));
}

#[tokio::test]
async fn fresh_token_is_returned_without_login() {
    // No login mock mounted: any login attempt would fail the test.
    let server = MockServer::start().await;
    let client = UpstreamClient::new().unwrap().with_base_url(server.uri());
    let config = ConfigStore::in_memory(GatewayConfig::default());
    let pool = AccountPool::new(Vec::new());

    let fresh = token_with_exp(4_102_444_800); // far future
    let mut credential = seed("a@x", Some(fresh.clone()));
    let token = pool
        .ensure_token(&mut credential, &client, &config)
        .await
        .expect("no refresh needed");
    assert_eq!(token, fresh);
}

#[tokio::test]
async fn opaque_token_is_trusted_without_login() {
    let server = MockServer::start().await;
    let client = UpstreamClient::new().unwrap().with_base_url(server.uri());
    let config = ConfigStore::in_memory(GatewayConfig::default());
    let pool = AccountPool::new(Vec::new());

    let mut credential = seed("a@x", Some("opaque-session-token".to_string()));
    let token = pool
        .ensure_token(&mut credential, &client, &config)
        .await
        .expect("opaque tokens are never refreshed");
    assert_eq!(token, "opaque-session-token");
}

#[tokio::test]
async fn login_failure_surfaces_as_account_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/users/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = UpstreamClient::new().unwrap().with_base_url(server.uri());
    let config = ConfigStore::in_memory(GatewayConfig::default());
    let pool = AccountPool::new(Vec::new());

    let mut credential = seed("a@x", None);
    let err = pool
        .ensure_token(&mut credential, &client, &config)
        .await
        .expect_err("login must fail");
    assert!(matches!(err, AccountError::Login(_)));
}

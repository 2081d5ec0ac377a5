//! Personal access token integration tests.
//!
//! Covers the generate, validate and revoke lifecycle against the in-memory
//! caching service.

use auth_broker::services::cache::mock::InMemoryCacheStore;
use broker_test_utils::{
    MessageAssertions, TestBrokerServer, TestTokenBuilder, TokenAssertions, ADMIN_USER,
    BROKER_KEY_ID,
};
use serde_json::json;

const BASE: &str = "/gateway/auth/access-token";

async fn generate(
    server: &TestBrokerServer,
    user: &str,
    scopes: &[&str],
) -> Result<String, anyhow::Error> {
    let login = TestTokenBuilder::new()
        .for_user(user)
        .sign(server.gateway_key())?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .header("Cookie", server.auth_cookie(&login))
        .json(&json!({"validity": 30, "scopes": scopes}))
        .send()
        .await?;
    anyhow::ensure!(
        response.status() == 200,
        "generate returned {}",
        response.status()
    );
    Ok(response.text().await?)
}

fn login_cookie(server: &TestBrokerServer, user: &str) -> Result<String, anyhow::Error> {
    let login = TestTokenBuilder::new()
        .for_user(user)
        .sign(server.gateway_key())?;
    Ok(server.auth_cookie(&login))
}

async fn validate(
    server: &TestBrokerServer,
    token: &str,
    service_id: &str,
) -> Result<reqwest::StatusCode, anyhow::Error> {
    let response = reqwest::Client::new()
        .post(format!("{}{}/validate", server.url(), BASE))
        .json(&json!({"token": token, "serviceId": service_id}))
        .send()
        .await?;
    Ok(response.status())
}

#[tokio::test]
async fn test_generate_returns_scoped_broker_token() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let token = generate(&server, "USER1", &["Service1", " service2 "]).await?;

    token
        .assert_for_subject("USER1")
        .assert_signed_by(BROKER_KEY_ID)
        .assert_has_scope("service1")
        .assert_has_scope("service2");
    // hash salt and the token record
    assert_eq!(server.cache().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_generate_content_type_is_plain_text() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let login = TestTokenBuilder::new().sign(server.gateway_key())?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .header("Cookie", server.auth_cookie(&login))
        .json(&json!({"validity": 1, "scopes": ["service1"]}))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert_eq!(content_type.as_deref(), Some("text/plain"));

    Ok(())
}

#[tokio::test]
async fn test_generate_requires_a_scope() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let login = TestTokenBuilder::new().sign(server.gateway_key())?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .header("Cookie", server.auth_cookie(&login))
        .json(&json!({"validity": 30, "scopes": ["  "]}))
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    body.assert_message_number("ZWEAO400E");
    assert!(server.cache().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_generate_requires_authentication() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .json(&json!({"validity": 30, "scopes": ["service1"]}))
        .send()
        .await?;

    assert_eq!(response.status(), 401);

    Ok(())
}

#[tokio::test]
async fn test_generate_with_caching_service_down() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::builder()
        .with_cache(InMemoryCacheStore::unavailable())
        .spawn()
        .await?;
    let login = TestTokenBuilder::new().sign(server.gateway_key())?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .header("Cookie", server.auth_cookie(&login))
        .json(&json!({"validity": 30, "scopes": ["service1"]}))
        .send()
        .await?;

    assert_eq!(response.status(), 503);

    Ok(())
}

#[tokio::test]
async fn test_validate_checks_scope() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let token = generate(&server, "USER1", &["service1"]).await?;

    assert_eq!(validate(&server, &token, "service1").await?, 200);
    assert_eq!(validate(&server, &token, "SERVICE1").await?, 200);
    assert_eq!(validate(&server, &token, "service2").await?, 401);

    Ok(())
}

#[tokio::test]
async fn test_validate_rejects_gateway_session_token() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let session = TestTokenBuilder::new().sign(server.gateway_key())?;

    assert_eq!(validate(&server, &session, "service1").await?, 401);

    Ok(())
}

#[tokio::test]
async fn test_validate_rejects_garbage() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    assert_eq!(validate(&server, "not-a-jwt", "service1").await?, 401);

    Ok(())
}

#[tokio::test]
async fn test_revoke_lifecycle() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let token = generate(&server, "USER1", &["service1"]).await?;
    let client = reqwest::Client::new();

    let revoke = || {
        client
            .delete(format!("{}{}/revoke", server.url(), BASE))
            .json(&json!({"token": token}))
            .send()
    };

    assert_eq!(revoke().await?.status(), 204);
    assert_eq!(validate(&server, &token, "service1").await?, 401);
    assert_eq!(revoke().await?.status(), 404);
    assert_eq!(server.cache().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_revoked_access_token_cannot_authenticate() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let token = generate(&server, "USER1", &["service1"]).await?;
    let client = reqwest::Client::new();
    let ticket = |token: &str| {
        client
            .post(format!("{}/gateway/zaas/ticket", server.url()))
            .header("PRIVATE-TOKEN", token)
            .json(&json!({"applicationName": "APPL1"}))
            .send()
    };

    assert_eq!(ticket(&token).await?.status(), 200);

    client
        .delete(format!("{}{}/revoke", server.url(), BASE))
        .json(&json!({"token": token}))
        .send()
        .await?;

    let response = ticket(&token).await?;
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await?;
    body.assert_message_number("ZWEAG102E");

    Ok(())
}

#[tokio::test]
async fn test_revoke_own_tokens() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let mine = generate(&server, "USER1", &["service1"]).await?;
    let theirs = generate(&server, "USER2", &["service1"]).await?;
    let login = TestTokenBuilder::new()
        .for_user("USER1")
        .sign(server.gateway_key())?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/revoke/tokens", server.url(), BASE))
        .header("Cookie", server.auth_cookie(&login))
        .send()
        .await?;

    assert_eq!(response.status(), 204);
    assert_eq!(validate(&server, &mine, "service1").await?, 401);
    assert_eq!(validate(&server, &theirs, "service1").await?, 200);

    Ok(())
}

#[tokio::test]
async fn test_revoke_tokens_for_service() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let both = generate(&server, "USER1", &["service1", "service2"]).await?;
    let other = generate(&server, "USER2", &["service2"]).await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/revoke/tokens/scope", server.url(), BASE))
        .header("Cookie", login_cookie(&server, ADMIN_USER)?)
        .json(&json!({"serviceId": "service1"}))
        .send()
        .await?;

    assert_eq!(response.status(), 204);
    assert_eq!(validate(&server, &both, "service2").await?, 401);
    assert_eq!(validate(&server, &other, "service2").await?, 200);

    Ok(())
}

#[tokio::test]
async fn test_revoke_scope_requires_service_id() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/revoke/tokens/scope", server.url(), BASE))
        .header("Cookie", login_cookie(&server, ADMIN_USER)?)
        .json(&json!({"serviceId": ""}))
        .send()
        .await?;

    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn test_evict_keeps_live_tokens() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let token = generate(&server, "USER1", &["service1"]).await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/evict", server.url(), BASE))
        .header("Cookie", login_cookie(&server, ADMIN_USER)?)
        .send()
        .await?;

    assert_eq!(response.status(), 204);
    assert_eq!(validate(&server, &token, "service1").await?, 200);

    Ok(())
}

#[tokio::test]
async fn test_revoke_tokens_for_service_requires_admin() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;
    let victim = generate(&server, "VICTIM", &["svc"]).await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/revoke/tokens/scope", server.url(), BASE))
        .header("Cookie", login_cookie(&server, "NOBODY")?)
        .json(&json!({"serviceId": "svc"}))
        .send()
        .await?;

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await?;
    body.assert_message_number("ZWEAT403E")
        .assert_message_key("org.zowe.apiml.security.forbidden");
    assert_eq!(validate(&server, &victim, "svc").await?, 200);

    Ok(())
}

#[tokio::test]
async fn test_evict_requires_admin() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/evict", server.url(), BASE))
        .header("Cookie", login_cookie(&server, "USER1")?)
        .send()
        .await?;

    assert_eq!(response.status(), 403);

    Ok(())
}

#[tokio::test]
async fn test_admin_routes_still_require_authentication() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .delete(format!("{}{}/revoke/tokens/scope", server.url(), BASE))
        .json(&json!({"serviceId": "svc"}))
        .send()
        .await?;

    assert_eq!(response.status(), 401);

    Ok(())
}

#[tokio::test]
async fn test_generate_with_malformed_body_uses_message_catalog() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/generate", server.url(), BASE))
        .header("Cookie", login_cookie(&server, "USER1")?)
        .header("Content-Type", "application/json")
        .body("{\"validity\": ")
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    body.assert_message_number("ZWEAO400E");
    assert!(server.cache().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_validate_without_body_uses_message_catalog() -> Result<(), anyhow::Error> {
    let server = TestBrokerServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}{}/validate", server.url(), BASE))
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    body.assert_message_number("ZWEAO400E");

    Ok(())
}

//! Delegated login through a mocked upstream OpenID provider.

mod common;

use std::time::Duration;

use octofhir_idp::config::DelegatedConfig;
use octofhir_idp::federation::CallbackParams;
use octofhir_idp::types::NewAuthRequest;
use octofhir_idp::{AuthError, ClientOptions, OidcStorage, StorageFacade, TokenRequest};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
            "jwks_uri": format!("{}/keys", server.uri()),
            "userinfo_endpoint": format!("{}/userinfo", server.uri()),
        })))
        .mount(&server)
        .await;
    server
}

async fn setup(server: &MockServer) -> (StorageFacade, String, Uuid) {
    let mut config = common::config();
    config.delegated = DelegatedConfig {
        issuer: Some(server.uri()),
        client_id: Some("idp".to_string()),
        client_secret: Some("upstream-secret".to_string()),
        request_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(5),
        ..Default::default()
    };
    let facade = common::facade_with(config).await;

    let client_id = facade
        .create_client(ClientOptions {
            name: "spa".to_string(),
            public: true,
            redirect_uris: vec![common::REDIRECT.to_string()],
            ..Default::default()
        })
        .await
        .unwrap()
        .id;
    let request = facade
        .create_auth_request(NewAuthRequest {
            client_id: client_id.clone(),
            redirect_uri: common::REDIRECT.to_string(),
            scopes: vec!["openid".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    (facade, client_id, request.id)
}

/// Starts delegated login and returns the upstream callback for it.
async fn callback(facade: &StorageFacade, auth_request_id: Uuid) -> CallbackParams {
    let redirect = facade.start_delegated_login(auth_request_id).await.unwrap();
    let state = redirect
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned());
    CallbackParams {
        code: Some("upstream-code".to_string()),
        state,
        ..Default::default()
    }
}

#[tokio::test]
async fn login_binds_local_user_and_issues_tokens() {
    let server = upstream().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=upstream-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "upstream-access",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "upstream-user",
            "email": "user@example.com",
        })))
        .mount(&server)
        .await;
    let (facade, client_id, id) = setup(&server).await;

    let redirect = facade.start_delegated_login(id).await.unwrap();
    assert!(redirect.as_str().starts_with(&format!("{}/authorize", server.uri())));
    assert!(!redirect.as_str().contains(&id.to_string()));

    let authenticated = facade
        .delegated_callback(callback(&facade, id).await)
        .await
        .unwrap();
    let user_id = authenticated.subject.clone().unwrap();
    let user = facade.read_user(&user_id).await.unwrap();
    assert_eq!(user.subject, "upstream-user");
    assert_eq!(facade.list_users(None, None).await.unwrap().data.len(), 1);

    let mut exchange = TokenRequest {
        code: Some(id.to_string()),
        client_id: Some(client_id),
        ..TokenRequest::new("authorization_code")
    };
    assert!(matches!(
        facade.token_request(&exchange, None).await,
        Err(AuthError::InvalidGrant { .. })
    ));
    exchange.redirect_uri = Some(common::REDIRECT.to_string());
    let response = facade.token_request(&exchange, None).await.unwrap();
    let claims = facade.validate_token(&response.access_token).await.unwrap();
    assert_eq!(claims.sub.as_deref(), Some(user_id.as_str()));
}

#[tokio::test]
async fn callback_with_auth_request_id_as_state_is_rejected() {
    let server = upstream().await;
    let (facade, _, id) = setup(&server).await;
    facade.start_delegated_login(id).await.unwrap();

    let err = facade
        .delegated_callback(CallbackParams {
            code: Some("upstream-code".to_string()),
            state: Some(id.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRequest { .. }));
    assert!(!facade.auth_request_by_id(id).await.unwrap().unwrap().done);
}

#[tokio::test]
async fn error_callback_is_user_visible_failure() {
    let server = upstream().await;
    let (facade, _, id) = setup(&server).await;

    let err = facade
        .delegated_callback(CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("user cancelled".to_string()),
            state: callback(&facade, id).await.state,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccessDenied { .. }));
    assert_eq!(err.oauth_error_code(), "access_denied");

    let request = facade.auth_request_by_id(id).await.unwrap().unwrap();
    assert!(!request.done);
    assert!(request.subject.is_none());
}

#[tokio::test]
async fn upstream_rejection_is_not_retried() {
    let server = upstream().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code expired",
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (facade, _, id) = setup(&server).await;

    let err = facade
        .delegated_callback(callback(&facade, id).await)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccessDenied { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn transient_upstream_failure_is_retried() {
    let server = upstream().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;
    let (facade, _, id) = setup(&server).await;

    let err = facade
        .delegated_callback(callback(&facade, id).await)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TemporarilyUnavailable { .. }));
    assert!(err.is_retryable());
}

//! Client credentials grant through the token endpoint.

mod common;

use std::collections::BTreeMap;

use octofhir_idp::{AuthError, ClientOptions, OidcStorage, TokenRequest};

async fn client_with_secret(
    facade: &octofhir_idp::StorageFacade,
    options: ClientOptions,
) -> (String, String) {
    let client = facade.create_client(options).await.unwrap();
    let secret = facade
        .create_secret(&client.id, None, BTreeMap::new())
        .await
        .unwrap();
    (client.id, secret.clear)
}

fn c1() -> ClientOptions {
    ClientOptions {
        name: "c1".to_string(),
        scopes: vec!["scope1".to_string(), "scope2".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn token_carries_client_scopes_without_subject() {
    let facade = common::facade().await;
    let (client_id, secret) = client_with_secret(&facade, c1()).await;

    let response = facade
        .token_request(
            &TokenRequest::new("client_credentials"),
            Some(&common::basic_auth(&client_id, &secret)),
        )
        .await
        .unwrap();
    assert_eq!(response.token_type, "Bearer");
    assert!(response.refresh_token.is_none());

    let claims = facade.validate_token(&response.access_token).await.unwrap();
    assert_eq!(claims.scope, "scope1 scope2");
    assert_eq!(claims.client_id, client_id);
    assert!(claims.sub.is_none());
}

#[tokio::test]
async fn secret_in_body_and_scope_narrowing() {
    let facade = common::facade().await;
    let (client_id, secret) = client_with_secret(&facade, c1()).await;

    let request = TokenRequest {
        client_id: Some(client_id),
        client_secret: Some(secret),
        scope: Some("scope2 admin".to_string()),
        ..TokenRequest::new("client_credentials")
    };
    let response = facade.token_request(&request, None).await.unwrap();
    assert_eq!(response.scope, "scope2");
}

#[tokio::test]
async fn scope_checking_rejects_escalation() {
    let mut config = common::config();
    config.oauth.check_scopes = true;
    let facade = common::facade_with(config).await;
    let (client_id, secret) = client_with_secret(&facade, c1()).await;

    let request = TokenRequest {
        scope: Some("scope1 admin".to_string()),
        ..TokenRequest::new("client_credentials")
    };
    let err = facade
        .token_request(&request, Some(&common::basic_auth(&client_id, &secret)))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidScope { .. }));
    assert_eq!(err.oauth_error_code(), "invalid_scope");
}

#[tokio::test]
async fn bad_credentials_are_invalid_client() {
    let facade = common::facade().await;
    let (client_id, _) = client_with_secret(&facade, c1()).await;

    for authorization in [
        common::basic_auth(&client_id, "wrong"),
        common::basic_auth("unknown", "wrong"),
        "Basic !!!".to_string(),
    ] {
        let err = facade
            .token_request(&TokenRequest::new("client_credentials"), Some(&authorization))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
        assert_eq!(err.http_status(), 401);
    }
}

#[tokio::test]
async fn client_without_secrets_cannot_authenticate() {
    let facade = common::facade().await;
    let (client_id, secret) = client_with_secret(&facade, c1()).await;
    let only = facade.read_client(&client_id).await.unwrap().secrets[0].id.clone();
    facade.delete_secret(&client_id, &only).await.unwrap();

    assert!(matches!(
        facade
            .token_request(
                &TokenRequest::new("client_credentials"),
                Some(&common::basic_auth(&client_id, &secret)),
            )
            .await,
        Err(AuthError::InvalidClient { .. })
    ));
}

#[tokio::test]
async fn unsupported_grant_type() {
    let facade = common::facade().await;
    assert!(matches!(
        facade.token_request(&TokenRequest::new("password"), None).await,
        Err(AuthError::UnsupportedGrantType { .. })
    ));
}

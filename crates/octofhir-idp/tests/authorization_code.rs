//! Authorization requests, PKCE and the authorization code grant.

mod common;

use octofhir_idp::oauth::{PkceChallenge, PkceVerifier};
use octofhir_idp::types::NewAuthRequest;
use octofhir_idp::{AuthError, ClientOptions, OidcStorage, StorageFacade, TokenKind, TokenRequest};
use uuid::Uuid;

async fn spa(facade: &StorageFacade) -> String {
    facade
        .create_client(ClientOptions {
            name: "c1".to_string(),
            public: true,
            redirect_uris: vec![common::REDIRECT.to_string()],
            scopes: vec!["scope1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

fn new_request(client_id: &str, challenge: Option<&PkceChallenge>) -> NewAuthRequest {
    NewAuthRequest {
        client_id: client_id.to_string(),
        redirect_uri: common::REDIRECT.to_string(),
        scopes: vec!["openid".to_string(), "scope1".to_string()],
        state: Some("xyz".to_string()),
        nonce: Some("nonce-1".to_string()),
        code_challenge: challenge.map(|c| c.as_str().to_string()),
        code_challenge_method: challenge.map(PkceChallenge::method),
    }
}

#[tokio::test]
async fn pkce_mismatch_then_single_success() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;
    let verifier = PkceVerifier::generate();
    let challenge = PkceChallenge::from_verifier(&verifier);

    let request = facade
        .create_auth_request(new_request(&client_id, Some(&challenge)))
        .await
        .unwrap();
    assert!(!request.done);
    facade
        .authenticate_auth_request(request.id, "user-1")
        .await
        .unwrap();

    assert!(matches!(
        facade.exchange_auth_request(request.id, None).await,
        Err(AuthError::PkceVerificationFailed)
    ));
    let other = PkceVerifier::generate();
    assert!(matches!(
        facade.exchange_auth_request(request.id, Some(other.as_str())).await,
        Err(AuthError::PkceVerificationFailed)
    ));

    let exchanged = facade
        .exchange_auth_request(request.id, Some(verifier.as_str()))
        .await
        .unwrap();
    assert_eq!(exchanged.subject.as_deref(), Some("user-1"));

    assert!(matches!(
        facade
            .exchange_auth_request(request.id, Some(verifier.as_str()))
            .await,
        Err(AuthError::Replay { .. })
    ));
}

#[tokio::test]
async fn concurrent_exchanges_yield_one_success() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;
    let request = facade
        .create_auth_request(new_request(&client_id, None))
        .await
        .unwrap();
    facade
        .authenticate_auth_request(request.id, "user-1")
        .await
        .unwrap();

    let id = request.id;
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let facade = facade.clone();
            tokio::spawn(async move { facade.exchange_auth_request(id, None).await })
        })
        .collect();

    let mut successes = 0;
    let mut replays = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AuthError::Replay { .. }) => replays += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(replays, 15);
}

#[tokio::test]
async fn create_rejects_unknown_client_and_redirect() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;

    assert!(matches!(
        facade.create_auth_request(new_request("missing", None)).await,
        Err(AuthError::InvalidRequest { .. })
    ));

    let mut request = new_request(&client_id, None);
    request.redirect_uri = "https://evil.example.com/cb".to_string();
    assert!(matches!(
        facade.create_auth_request(request).await,
        Err(AuthError::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn lifecycle_errors() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;
    let request = facade
        .create_auth_request(new_request(&client_id, None))
        .await
        .unwrap();

    assert!(matches!(
        facade.exchange_auth_request(request.id, None).await,
        Err(AuthError::Conflict { .. })
    ));
    assert!(matches!(
        facade.authenticate_auth_request(Uuid::new_v4(), "user-1").await,
        Err(AuthError::NotFound { .. })
    ));

    facade
        .authenticate_auth_request(request.id, "user-1")
        .await
        .unwrap();
    facade.exchange_auth_request(request.id, None).await.unwrap();
    assert!(matches!(
        facade.authenticate_auth_request(request.id, "user-2").await,
        Err(AuthError::Conflict { .. })
    ));
}

#[tokio::test]
async fn code_exchange_through_token_endpoint() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;
    let verifier = PkceVerifier::generate();
    let challenge = PkceChallenge::from_verifier(&verifier);
    let request = facade
        .create_auth_request(new_request(&client_id, Some(&challenge)))
        .await
        .unwrap();
    facade
        .authenticate_auth_request(request.id, "user-1")
        .await
        .unwrap();

    let token_request = TokenRequest {
        code: Some(request.id.to_string()),
        redirect_uri: Some(common::REDIRECT.to_string()),
        code_verifier: Some(verifier.as_str().to_string()),
        client_id: Some(client_id.clone()),
        ..TokenRequest::new("authorization_code")
    };
    let response = facade.token_request(&token_request, None).await.unwrap();
    assert_eq!(response.scope, "openid scope1");

    let access = facade.validate_token(&response.access_token).await.unwrap();
    assert_eq!(access.sub.as_deref(), Some("user-1"));
    assert_eq!(access.client_id, client_id);

    let id_token = facade
        .validate_token(response.id_token.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(id_token.token_use, TokenKind::Id);
    assert_eq!(id_token.nonce.as_deref(), Some("nonce-1"));
    assert_eq!(id_token.aud, vec![client_id]);

    let err = facade.token_request(&token_request, None).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

#[tokio::test]
async fn code_exchange_requires_redirect_uri() {
    let facade = common::facade().await;
    let client_id = spa(&facade).await;
    let request = facade
        .create_auth_request(new_request(&client_id, None))
        .await
        .unwrap();
    facade
        .authenticate_auth_request(request.id, "user-1")
        .await
        .unwrap();

    let mut token_request = TokenRequest {
        code: Some(request.id.to_string()),
        client_id: Some(client_id),
        ..TokenRequest::new("authorization_code")
    };
    let err = facade.token_request(&token_request, None).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");

    token_request.redirect_uri = Some(common::REDIRECT.to_string());
    let response = facade.token_request(&token_request, None).await.unwrap();
    assert_eq!(response.scope, "openid scope1");
}

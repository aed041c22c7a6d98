//! Authorization code grant.
//!
//! The code is the authorization request id. Client and redirect URI
//! matching and PKCE run inside the atomic consume, so a failed check
//! leaves the code usable and a second exchange fails with `Replay`.

use async_trait::async_trait;
use uuid::Uuid;

use super::{ClientAuthenticator, ClientCredentials, GrantHandler, GrantType, TokenRequest, TokenResponse};
use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::AuthRequestStore;
use crate::token::TokenStore;

pub struct AuthorizationCodeGrant {
    authenticator: ClientAuthenticator,
    auth_requests: AuthRequestStore,
    tokens: TokenStore,
}

impl AuthorizationCodeGrant {
    #[must_use]
    pub fn new(
        authenticator: ClientAuthenticator,
        auth_requests: AuthRequestStore,
        tokens: TokenStore,
    ) -> Self {
        Self {
            authenticator,
            auth_requests,
            tokens,
        }
    }
}

#[async_trait]
impl GrantHandler for AuthorizationCodeGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    async fn handle(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let credentials =
            credentials.ok_or_else(|| AuthError::invalid_client("no client credentials provided"))?;
        let code = TokenRequest::require(&request.code, "code")?;
        let client = self.authenticator.authenticate(credentials).await?.client;

        let id = Uuid::parse_str(code)
            .map_err(|_| AuthError::invalid_grant("malformed authorization code"))?;
        let auth_request = self
            .auth_requests
            .exchange_for_client(
                id,
                &client.id,
                request.redirect_uri.as_deref(),
                request.code_verifier.as_deref(),
            )
            .await?;
        let subject = auth_request
            .subject
            .as_deref()
            .ok_or_else(|| AuthError::internal("authenticated request without subject"))?;

        let access = self
            .tokens
            .issue_access_token(&client, Some(subject), &auth_request.scopes, request.audiences())
            .await?;
        let refresh = self.tokens.issue_refresh_token(&access.token).await?;
        let mut response =
            TokenResponse::for_access_token(&access).with_refresh_token(refresh.value);

        if access.token.scopes.iter().any(|s| s == "openid") {
            let id_token = self
                .tokens
                .issue_id_token(&client.id, subject, auth_request.nonce.clone())
                .await?;
            response = response.with_id_token(id_token.value);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::OAuthConfig;
    use crate::oauth::{PkceChallenge, PkceVerifier};
    use crate::storage::{MemoryStorage, Stores};
    use crate::token::{JwtSigner, SigningKey, SigningKeySet};
    use crate::types::{AuthRequest, Client, ClientOptions, NewAuthRequest, TokenKind};
    use crate::vault::{SecretVault, test_vault_config};

    const ISSUER: &str = "https://idp.example.com";
    const REDIRECT: &str = "https://app.example.com/cb";

    struct Fixture {
        grant: AuthorizationCodeGrant,
        requests: AuthRequestStore,
        tokens: TokenStore,
    }

    async fn fixture() -> Fixture {
        let stores = Stores::from_backend(MemoryStorage::new());
        stores
            .clients
            .create_client(&Client::from_options(
                "spa".to_string(),
                ClientOptions {
                    public: true,
                    redirect_uris: vec![REDIRECT.to_string()],
                    scopes: vec!["scope1".to_string()],
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let key = SigningKey::from_pem(include_str!("../../tests/fixtures/signing_key.pem"), None)
            .unwrap();
        let signer = JwtSigner::new(Arc::new(SigningKeySet::new(key)), ISSUER, 5);
        let tokens = TokenStore::new(&stores, Arc::new(signer), ISSUER, &OAuthConfig::default());
        let requests = AuthRequestStore::new(&stores, Duration::from_secs(600));
        let vault = SecretVault::new(&stores, &test_vault_config()).unwrap();
        Fixture {
            grant: AuthorizationCodeGrant::new(
                ClientAuthenticator::new(vault),
                requests.clone(),
                tokens.clone(),
            ),
            requests,
            tokens,
        }
    }

    async fn authenticated(f: &Fixture, challenge: Option<&PkceChallenge>) -> AuthRequest {
        let request = f
            .requests
            .create(NewAuthRequest {
                client_id: "spa".to_string(),
                redirect_uri: REDIRECT.to_string(),
                scopes: vec!["openid".to_string(), "scope1".to_string(), "admin".to_string()],
                nonce: Some("n-1".to_string()),
                code_challenge: challenge.map(|c| c.as_str().to_string()),
                code_challenge_method: challenge.map(PkceChallenge::method),
                ..Default::default()
            })
            .await
            .unwrap();
        f.requests.authenticate(request.id, "user-1").await.unwrap()
    }

    fn token_request(code: Uuid, verifier: Option<&str>) -> TokenRequest {
        TokenRequest {
            code: Some(code.to_string()),
            redirect_uri: Some(REDIRECT.to_string()),
            code_verifier: verifier.map(str::to_string),
            ..TokenRequest::new("authorization_code")
        }
    }

    #[tokio::test]
    async fn test_exchange_issues_access_refresh_and_id_tokens() {
        let f = fixture().await;
        let verifier = PkceVerifier::generate();
        let request = authenticated(&f, Some(&PkceChallenge::from_verifier(&verifier))).await;
        let credentials = ClientCredentials::public("spa");

        let response = f
            .grant
            .handle(&token_request(request.id, Some(verifier.as_str())), Some(&credentials))
            .await
            .unwrap();
        assert_eq!(response.scope, "openid scope1");
        assert_eq!(response.expires_in, 3600);
        assert!(response.refresh_token.is_some());

        let claims = f.tokens.validate(&response.access_token).await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));

        let id_claims = f
            .tokens
            .validate(response.id_token.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(id_claims.token_use, TokenKind::Id);
        assert_eq!(id_claims.nonce.as_deref(), Some("n-1"));
    }

    #[tokio::test]
    async fn test_wrong_verifier_then_replay() {
        let f = fixture().await;
        let verifier = PkceVerifier::generate();
        let request = authenticated(&f, Some(&PkceChallenge::from_verifier(&verifier))).await;
        let credentials = ClientCredentials::public("spa");

        let wrong = PkceVerifier::generate();
        assert!(matches!(
            f.grant
                .handle(&token_request(request.id, Some(wrong.as_str())), Some(&credentials))
                .await,
            Err(AuthError::PkceVerificationFailed)
        ));

        let ok = token_request(request.id, Some(verifier.as_str()));
        assert!(f.grant.handle(&ok, Some(&credentials)).await.is_ok());
        let err = f.grant.handle(&ok, Some(&credentials)).await.unwrap_err();
        assert!(matches!(err, AuthError::Replay { .. }));
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_redirect_mismatch_and_missing_code() {
        let f = fixture().await;
        let request = authenticated(&f, None).await;
        let credentials = ClientCredentials::public("spa");

        let mut mismatched = token_request(request.id, None);
        mismatched.redirect_uri = Some("https://app.example.com/other".to_string());
        assert!(matches!(
            f.grant.handle(&mismatched, Some(&credentials)).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        let mut no_redirect = token_request(request.id, None);
        no_redirect.redirect_uri = None;
        assert!(matches!(
            f.grant.handle(&no_redirect, Some(&credentials)).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        let missing = TokenRequest::new("authorization_code");
        assert!(matches!(
            f.grant.handle(&missing, Some(&credentials)).await,
            Err(AuthError::InvalidRequest { .. })
        ));

        let mut malformed = token_request(request.id, None);
        malformed.code = Some("not-a-code".to_string());
        assert!(matches!(
            f.grant.handle(&malformed, Some(&credentials)).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        assert!(matches!(
            f.grant.handle(&token_request(request.id, None), None).await,
            Err(AuthError::InvalidClient { .. })
        ));
    }
}

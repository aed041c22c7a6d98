//! Refresh token grant.

use async_trait::async_trait;

use super::{
    ClientAuthenticator, ClientCredentials, GrantHandler, GrantType, TokenRequest, TokenResponse,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::token::TokenStore;

pub struct RefreshTokenGrant {
    authenticator: ClientAuthenticator,
    tokens: TokenStore,
}

impl RefreshTokenGrant {
    #[must_use]
    pub fn new(authenticator: ClientAuthenticator, tokens: TokenStore) -> Self {
        Self {
            authenticator,
            tokens,
        }
    }
}

#[async_trait]
impl GrantHandler for RefreshTokenGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    async fn handle(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let credentials =
            credentials.ok_or_else(|| AuthError::invalid_client("no client credentials provided"))?;
        let value = TokenRequest::require(&request.refresh_token, "refresh_token")?;
        let client = self.authenticator.authenticate(credentials).await?.client;

        let refreshed = self.tokens.refresh(&client.id, value, &request.scopes()).await?;
        let response = TokenResponse::for_access_token(&refreshed.access);
        Ok(match refreshed.refresh {
            Some(refresh) => response.with_refresh_token(refresh.value),
            None => response,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::OAuthConfig;
    use crate::storage::{MemoryStorage, Stores};
    use crate::token::{JwtSigner, SigningKey, SigningKeySet};
    use crate::types::{Client, ClientOptions};
    use crate::vault::{SecretVault, test_vault_config};

    const ISSUER: &str = "https://idp.example.com";

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let stores = Stores::from_backend(MemoryStorage::new());
        let client = Client::from_options(
            "spa".to_string(),
            ClientOptions {
                public: true,
                scopes: vec!["read".to_string(), "write".to_string()],
                ..Default::default()
            },
        );
        stores.clients.create_client(&client).await.unwrap();
        let key = SigningKey::from_pem(include_str!("../../tests/fixtures/signing_key.pem"), None)
            .unwrap();
        let signer = JwtSigner::new(Arc::new(SigningKeySet::new(key)), ISSUER, 5);
        let tokens = TokenStore::new(&stores, Arc::new(signer), ISSUER, &OAuthConfig::default());
        let vault = SecretVault::new(&stores, &test_vault_config()).unwrap();
        let grant = RefreshTokenGrant::new(ClientAuthenticator::new(vault), tokens.clone());

        let access = tokens
            .issue_access_token(
                &client,
                Some("user-1"),
                &["read".to_string(), "write".to_string()],
                vec![],
            )
            .await
            .unwrap();
        let refresh = tokens.issue_refresh_token(&access.token).await.unwrap();

        let request = TokenRequest {
            refresh_token: Some(refresh.value.clone()),
            scope: Some("read".to_string()),
            ..TokenRequest::new("refresh_token")
        };
        let credentials = ClientCredentials::public("spa");
        let response = grant.handle(&request, Some(&credentials)).await.unwrap();
        assert_eq!(response.scope, "read");
        assert!(response.refresh_token.is_some());
        assert_ne!(response.refresh_token.as_deref(), Some(refresh.value.as_str()));

        assert!(matches!(
            grant.handle(&request, Some(&credentials)).await,
            Err(AuthError::InvalidGrant { .. })
        ));
        assert!(matches!(
            grant
                .handle(&TokenRequest::new("refresh_token"), Some(&credentials))
                .await,
            Err(AuthError::InvalidRequest { .. })
        ));
    }
}

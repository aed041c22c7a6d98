//! Client credentials grant.
//!
//! Tokens carry no subject. Without a `scope` parameter the client gets its
//! whole allowed set. Requested scopes outside that set are rejected when
//! scope checking is on and silently dropped otherwise.

use async_trait::async_trait;

use super::{
    ClientAuthenticator, ClientCredentials, GrantHandler, GrantType, TokenRequest, TokenResponse,
};
use crate::AuthResult;
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::oauth::scope::excess;
use crate::token::TokenStore;

pub struct ClientCredentialsGrant {
    authenticator: ClientAuthenticator,
    tokens: TokenStore,
    check_scopes: bool,
    allow_public: bool,
}

impl ClientCredentialsGrant {
    #[must_use]
    pub fn new(authenticator: ClientAuthenticator, tokens: TokenStore, config: &OAuthConfig) -> Self {
        Self {
            authenticator,
            tokens,
            check_scopes: config.check_scopes,
            allow_public: config.allow_public_client_credentials,
        }
    }
}

#[async_trait]
impl GrantHandler for ClientCredentialsGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    async fn handle(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let credentials =
            credentials.ok_or_else(|| AuthError::invalid_client("no client credentials provided"))?;
        let client = self.authenticator.authenticate(credentials).await?.client;

        if client.public && !(client.trusted && self.allow_public) {
            tracing::warn!(client_id = %client.id, "public client refused client_credentials");
            return Err(AuthError::invalid_client(
                "public clients cannot use the client_credentials grant",
            ));
        }

        let requested = request.scopes();
        let requested = if requested.is_empty() {
            client.scopes.clone()
        } else {
            requested
        };

        if self.check_scopes && !client.trusted {
            let extra = excess(&requested, &client.scopes);
            if !extra.is_empty() {
                return Err(AuthError::invalid_scope(format!(
                    "scopes not allowed for client: {}",
                    extra.join(" ")
                )));
            }
        }

        let access = self
            .tokens
            .issue_access_token(&client, None, &requested, request.audiences())
            .await?;
        Ok(TokenResponse::for_access_token(&access))
    }
}

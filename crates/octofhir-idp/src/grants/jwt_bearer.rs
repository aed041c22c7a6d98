//! JWT-bearer assertion grant (RFC 7523).
//!
//! A trusted issuer signs an assertion naming a subject; the verified
//! assertion is exchanged for an access token for that subject. Client
//! authentication is optional. Granted scopes are the requested scopes the
//! assertion vouches for, or all of the assertion's scopes when none are
//! requested.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    ClientAuthenticator, ClientCredentials, GrantHandler, GrantType, TokenRequest, TokenResponse,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::federation::AssertionVerifier;
use crate::oauth::scope::intersect;
use crate::token::{TokenGrant, TokenStore};

pub struct JwtBearerGrant {
    authenticator: ClientAuthenticator,
    verifier: Arc<AssertionVerifier>,
    tokens: TokenStore,
}

impl JwtBearerGrant {
    #[must_use]
    pub fn new(
        authenticator: ClientAuthenticator,
        verifier: Arc<AssertionVerifier>,
        tokens: TokenStore,
    ) -> Self {
        Self {
            authenticator,
            verifier,
            tokens,
        }
    }
}

#[async_trait]
impl GrantHandler for JwtBearerGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::JwtBearer
    }

    async fn handle(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let assertion = TokenRequest::require(&request.assertion, "assertion")?;
        let client_id = match credentials {
            Some(credentials) => Some(self.authenticator.authenticate(credentials).await?.client.id),
            None => None,
        };

        let claims = self.verifier.verify(assertion).await.map_err(|e| {
            tracing::warn!(error = %e, "assertion rejected");
            AuthError::from(e)
        })?;

        let vouched = claims.scopes();
        let requested = request.scopes();
        let scopes = if requested.is_empty() {
            vouched
        } else {
            intersect(&requested, &vouched)
        };

        let access = self
            .tokens
            .mint_access_token(TokenGrant {
                client_id: client_id.unwrap_or_else(|| claims.iss.clone()),
                subject: Some(claims.sub),
                scopes,
                audience: request.audiences(),
            })
            .await?;
        Ok(TokenResponse::for_access_token(&access))
    }
}

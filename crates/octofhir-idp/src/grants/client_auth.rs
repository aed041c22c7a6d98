//! Client authentication for the token endpoint.
//!
//! # Authentication Priority
//!
//! When multiple credential sources are present they are tried in order:
//! 1. HTTP Basic Auth header (`client_secret_basic`)
//! 2. `client_id` + `client_secret` in the body (`client_secret_post`)
//! 3. `client_id` alone (public clients)
//!
//! Public clients never have a secret checked. A confidential client must
//! present one of its secrets.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::TokenRequest;
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::Client;
use crate::vault::SecretVault;

/// Token endpoint authentication methods (OpenID Connect Core 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// No client authentication (public clients).
    None,
    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,
    /// Client secret in request body.
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials presented with a token request.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub method: TokenEndpointAuthMethod,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// Credentials for `client_secret_basic`/`client_secret_post`.
    #[must_use]
    pub fn secret(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        method: TokenEndpointAuthMethod,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            method,
        }
    }

    /// Credentials of a public client identifying itself by id only.
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            method: TokenEndpointAuthMethod::None,
        }
    }

    /// Extracts credentials from a token request and its `Authorization`
    /// header. Returns `None` when the request carries no client identity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` for a malformed Basic header, or when the
    /// header and body name different clients.
    pub fn from_request(
        request: &TokenRequest,
        authorization: Option<&str>,
    ) -> AuthResult<Option<Self>> {
        if let Some(header) = authorization {
            let (client_id, client_secret) = parse_basic_auth(header)
                .ok_or_else(|| AuthError::invalid_client("malformed Basic authorization"))?;
            if request
                .client_id
                .as_deref()
                .is_some_and(|id| id != client_id)
            {
                return Err(AuthError::invalid_client(
                    "client_id does not match Basic authorization",
                ));
            }
            return Ok(Some(Self::secret(
                client_id,
                client_secret,
                TokenEndpointAuthMethod::ClientSecretBasic,
            )));
        }

        Ok(match (&request.client_id, &request.client_secret) {
            (Some(id), Some(secret)) => Some(Self::secret(
                id.clone(),
                secret.clone(),
                TokenEndpointAuthMethod::ClientSecretPost,
            )),
            (Some(id), None) => Some(Self::public(id.clone())),
            (None, _) => None,
        })
    }
}

/// Result of successful client authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    pub client: Client,
    pub auth_method: TokenEndpointAuthMethod,
}

/// Authenticates clients against the registry and secret vault.
#[derive(Clone)]
pub struct ClientAuthenticator {
    vault: SecretVault,
}

impl ClientAuthenticator {
    #[must_use]
    pub fn new(vault: SecretVault) -> Self {
        Self { vault }
    }

    /// # Errors
    ///
    /// Returns `InvalidClient` if the client is unknown, a confidential
    /// client presents no secret, or the secret does not match.
    pub async fn authenticate(
        &self,
        credentials: &ClientCredentials,
    ) -> AuthResult<AuthenticatedClient> {
        let client_id = credentials.client_id.as_str();
        let client = self
            .vault
            .find_client(client_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id, "authentication of unknown client");
                AuthError::invalid_client("unknown client")
            })?;

        if client.public {
            if credentials.client_secret.is_some() {
                tracing::debug!(client_id, "secret presented by public client ignored");
            }
            return Ok(AuthenticatedClient {
                client,
                auth_method: TokenEndpointAuthMethod::None,
            });
        }

        let Some(secret) = credentials.client_secret.as_deref() else {
            tracing::warn!(client_id, "confidential client presented no secret");
            return Err(AuthError::invalid_client(
                "confidential clients must provide client credentials",
            ));
        };
        if !self.vault.verify(client_id, secret).await? {
            tracing::warn!(client_id, method = %credentials.method, "client secret mismatch");
            return Err(AuthError::invalid_client("client secret mismatch"));
        }

        Ok(AuthenticatedClient {
            client,
            auth_method: credentials.method,
        })
    }
}

/// Parses an HTTP Basic Auth header into client id and secret.
///
/// Returns `None` if the header is not valid Basic Auth.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    // Split on first colon (password may contain colons)
    let (client_id, client_secret) = credentials.split_once(':')?;
    if client_id.is_empty() {
        return None;
    }

    Some((client_id.to_string(), client_secret.to_string()))
}

//! Token endpoint grants.
//!
//! A [`GrantDispatcher`] routes each [`TokenRequest`] to the
//! [`GrantHandler`] registered for its `grant_type`:
//!
//! - [`authorization_code`] - Exchange a consumed authorization request for
//!   access, refresh and ID tokens
//! - [`client_credentials`] - Machine-to-machine tokens without a subject
//! - [`refresh_token`] - Rotate a refresh token for a new access token
//! - [`jwt_bearer`] - RFC 7523 assertion exchange from a trusted issuer
//!
//! Client authentication is shared by all handlers and lives in
//! [`client_auth`].

pub mod authorization_code;
pub mod client_auth;
pub mod client_credentials;
pub mod jwt_bearer;
pub mod refresh_token;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::scope::join_scopes;
use crate::types::IssuedToken;

pub use authorization_code::AuthorizationCodeGrant;
pub use client_auth::{
    AuthenticatedClient, ClientAuthenticator, ClientCredentials, TokenEndpointAuthMethod,
    parse_basic_auth,
};
pub use client_credentials::ClientCredentialsGrant;
pub use jwt_bearer::JwtBearerGrant;
pub use refresh_token::RefreshTokenGrant;

/// Grant type URN for RFC 7523 assertions.
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// OAuth 2.0 grant types handled by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:jwt-bearer")]
    JwtBearer,
}

impl GrantType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::JwtBearer => JWT_BEARER_GRANT_TYPE,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "refresh_token" => Ok(Self::RefreshToken),
            JWT_BEARER_GRANT_TYPE => Ok(Self::JwtBearer),
            other => Err(AuthError::unsupported_grant_type(other)),
        }
    }
}

/// Token request parameters.
///
/// Different fields are required depending on the `grant_type`:
///
/// - `authorization_code`: code, redirect_uri, code_verifier
/// - `client_credentials`: (optional) scope
/// - `refresh_token`: refresh_token, (optional) scope
/// - `jwt-bearer`: assertion, (optional) scope
///
/// Clients authenticate with an HTTP Basic Auth header (not in this
/// struct), `client_id` + `client_secret` in the body, or `client_id` only
/// for public clients.
#[derive(Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,

    #[serde(default)]
    pub code: Option<String>,

    /// Must match the redirect URI of the authorization request.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub code_verifier: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Space-separated requested scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// Signed assertion for the JWT-bearer grant.
    #[serde(default)]
    pub assertion: Option<String>,

    /// Requested audience for the issued access token.
    #[serde(default)]
    pub audience: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenRequest {
    /// An empty request for `grant_type`.
    #[must_use]
    pub fn new(grant_type: impl Into<String>) -> Self {
        Self {
            grant_type: grant_type.into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            scope: None,
            assertion: None,
            audience: None,
        }
    }

    /// Requested scopes, parsed.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(crate::oauth::scope::parse_scopes)
            .unwrap_or_default()
    }

    /// Requested audiences, space-separated like scopes.
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        self.audience
            .as_deref()
            .map(crate::oauth::scope::parse_scopes)
            .unwrap_or_default()
    }

    pub(crate) fn require<'a>(
        value: &'a Option<String>,
        name: &str,
    ) -> AuthResult<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::invalid_request(format!("missing {name}")))
    }
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid scope1",
///   "refresh_token": "abc123..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (if openid scope was granted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Builds a response around a freshly issued access token.
    #[must_use]
    pub fn for_access_token(access: &IssuedToken) -> Self {
        Self {
            access_token: access.value.clone(),
            token_type: "Bearer".to_string(),
            expires_in: u64::try_from(access.token.lifetime_secs()).unwrap_or(0),
            scope: join_scopes(&access.token.scopes),
            refresh_token: None,
            id_token: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }
}

/// Handles one grant type.
#[async_trait]
pub trait GrantHandler: Send + Sync {
    fn grant_type(&self) -> GrantType;

    /// Runs the grant. `credentials` is what the caller presented, not yet
    /// authenticated.
    async fn handle(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse>;
}

/// Routes token requests to their grant handler.
#[derive(Clone, Default)]
pub struct GrantDispatcher {
    handlers: HashMap<GrantType, Arc<dyn GrantHandler>>,
}

impl GrantDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any handler for the same grant type.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn GrantHandler>) -> Self {
        self.handlers.insert(handler.grant_type(), handler);
        self
    }

    #[must_use]
    pub fn supports(&self, grant_type: GrantType) -> bool {
        self.handlers.contains_key(&grant_type)
    }

    /// Grant types with a registered handler, for discovery.
    #[must_use]
    pub fn grant_types(&self) -> Vec<GrantType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(GrantType::as_str);
        types
    }

    /// Runs a token request.
    ///
    /// `authorization` is the raw HTTP `Authorization` header, if any.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedGrantType` for an unknown or unregistered grant
    /// type, or whatever the handler reports.
    pub async fn dispatch(
        &self,
        request: &TokenRequest,
        authorization: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        let grant_type: GrantType = request.grant_type.parse()?;
        let handler = self
            .handlers
            .get(&grant_type)
            .ok_or_else(|| AuthError::unsupported_grant_type(grant_type.as_str()))?;
        let credentials = ClientCredentials::from_request(request, authorization)?;

        match handler.handle(request, credentials.as_ref()).await {
            Ok(response) => {
                tracing::info!(
                    grant_type = %grant_type,
                    client_id = credentials.as_ref().map(|c| c.client_id.as_str()),
                    scope = %response.scope,
                    "token request granted"
                );
                Ok(response)
            }
            Err(e) => {
                if e.is_server_error() {
                    tracing::error!(grant_type = %grant_type, error = %e, "token request failed");
                } else {
                    tracing::warn!(
                        grant_type = %grant_type,
                        client_id = credentials.as_ref().map(|c| c.client_id.as_str()),
                        error = %e,
                        "token request rejected"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(GrantType);

    #[async_trait]
    impl GrantHandler for Fixed {
        fn grant_type(&self) -> GrantType {
            self.0
        }

        async fn handle(
            &self,
            _request: &TokenRequest,
            credentials: Option<&ClientCredentials>,
        ) -> AuthResult<TokenResponse> {
            Ok(TokenResponse {
                access_token: credentials.map(|c| c.client_id.clone()).unwrap_or_default(),
                token_type: "Bearer".to_string(),
                expires_in: 1,
                scope: String::new(),
                refresh_token: None,
                id_token: None,
            })
        }
    }

    #[test]
    fn test_grant_type_parse() {
        for grant in [
            GrantType::AuthorizationCode,
            GrantType::ClientCredentials,
            GrantType::RefreshToken,
            GrantType::JwtBearer,
        ] {
            assert_eq!(grant.as_str().parse::<GrantType>().unwrap(), grant);
        }
        assert!(matches!(
            "password".parse::<GrantType>(),
            Err(AuthError::UnsupportedGrantType { .. })
        ));
    }

    #[test]
    fn test_token_request_from_form_fields() {
        let request: TokenRequest = serde_json::from_value(serde_json::json!({
            "grant_type": JWT_BEARER_GRANT_TYPE,
            "assertion": "a.b.c",
            "scope": "openid  email openid",
        }))
        .unwrap();
        assert_eq!(request.scopes(), vec!["openid", "email"]);
        assert!(request.audiences().is_empty());
        assert!(!format!("{request:?}").contains("a.b.c"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_grant_type() {
        let dispatcher =
            GrantDispatcher::new().with_handler(Arc::new(Fixed(GrantType::ClientCredentials)));
        assert_eq!(dispatcher.grant_types(), vec![GrantType::ClientCredentials]);

        let mut request = TokenRequest::new("client_credentials");
        request.client_id = Some("c1".to_string());
        let response = dispatcher.dispatch(&request, None).await.unwrap();
        assert_eq!(response.access_token, "c1");

        assert!(matches!(
            dispatcher
                .dispatch(&TokenRequest::new("refresh_token"), None)
                .await,
            Err(AuthError::UnsupportedGrantType { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch(&TokenRequest::new("password"), None).await,
            Err(AuthError::UnsupportedGrantType { .. })
        ));
    }
}

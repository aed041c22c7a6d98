//! Upstream OpenID provider client.
//!
//! [`OidcUpstreamClient`] discovers the provider's endpoints from
//! `/.well-known/openid-configuration`, builds the authorization redirect,
//! and exchanges a callback code for the user's identity. Identity comes
//! from the verified ID token, or from the userinfo endpoint when the
//! provider returns no ID token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use super::error::FederationError;
use super::jwks::{RemoteKeySource, decode_with_source};
use crate::config::DelegatedConfig;

/// Subset of the OpenID provider metadata this server uses.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Identity asserted by the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamIdentity {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Calls made to the upstream provider during delegated login.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// URL the user agent is redirected to; `state` comes back on the
    /// callback.
    async fn authorization_url(&self, state: &str) -> Result<Url, FederationError>;

    /// Exchanges a callback code and returns the authenticated identity.
    async fn exchange_code(&self, code: &str) -> Result<UpstreamIdentity, FederationError>;
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct UpstreamTokens {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
}

/// Fetches the OpenID configuration of `issuer`.
///
/// # Errors
///
/// Returns a network or status error, or `InvalidResponse` if the document
/// is malformed or names a different issuer.
pub async fn fetch_discovery(
    http: &reqwest::Client,
    issuer: &str,
) -> Result<DiscoveryDocument, FederationError> {
    let issuer = issuer.trim_end_matches('/');
    let url = format!("{issuer}/.well-known/openid-configuration");
    tracing::debug!(%issuer, "fetching OpenID configuration");

    let response = http
        .get(&url)
        .header(ACCEPT, "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let document: DiscoveryDocument = response
        .json()
        .await
        .map_err(|e| FederationError::InvalidResponse(format!("discovery document: {e}")))?;
    if document.issuer.trim_end_matches('/') != issuer {
        return Err(FederationError::InvalidResponse(format!(
            "discovery issuer {} does not match {issuer}",
            document.issuer
        )));
    }
    Ok(document)
}

/// Turns a non-success response into an error, preferring the OAuth error
/// body when there is one.
pub(crate) async fn error_from_response(response: reqwest::Response) -> FederationError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<OAuthErrorResponse>(&body) {
        Ok(oauth) => {
            FederationError::oauth_error(status, oauth.error, oauth.error_description.unwrap_or_default())
        }
        Err(_) => FederationError::Status { status, body },
    }
}

/// [`UpstreamClient`] speaking OpenID Connect authorization code flow.
pub struct OidcUpstreamClient {
    http: reqwest::Client,
    issuer: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    scopes: Vec<String>,
    leeway_secs: u64,
    jwks_ttl: Duration,
    discovery: OnceCell<DiscoveryDocument>,
    keys: OnceCell<RemoteKeySource>,
}

impl OidcUpstreamClient {
    /// # Errors
    ///
    /// Returns `NotConfigured` unless issuer, client id and client secret
    /// are all set.
    pub fn new(
        http: reqwest::Client,
        config: &DelegatedConfig,
        local_issuer: &str,
        leeway: Duration,
    ) -> Result<Self, FederationError> {
        let (Some(issuer), Some(client_id), Some(client_secret)) = (
            config.issuer.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ) else {
            return Err(FederationError::NotConfigured);
        };
        Ok(Self {
            http,
            issuer,
            client_id,
            client_secret,
            redirect_url: config.redirect_url_for(local_issuer),
            scopes: config.scopes.clone(),
            leeway_secs: leeway.as_secs(),
            jwks_ttl: config.jwks_cache_ttl,
            discovery: OnceCell::new(),
            keys: OnceCell::new(),
        })
    }

    async fn discovery(&self) -> Result<&DiscoveryDocument, FederationError> {
        self.discovery
            .get_or_try_init(|| fetch_discovery(&self.http, &self.issuer))
            .await
    }

    async fn identity_from_id_token(
        &self,
        id_token: &str,
    ) -> Result<UpstreamIdentity, FederationError> {
        let document = self.discovery().await?;
        let keys = self
            .keys
            .get_or_try_init(|| async {
                let url = Url::parse(&document.jwks_uri)?;
                Ok::<_, FederationError>(RemoteKeySource::from_url(
                    self.http.clone(),
                    url,
                    self.jwks_ttl,
                ))
            })
            .await?;

        decode_with_source(id_token, keys, |v| {
            v.set_issuer(&[document.issuer.as_str()]);
            v.set_audience(&[self.client_id.as_str()]);
            v.leeway = self.leeway_secs;
        })
        .await
    }

    async fn identity_from_userinfo(
        &self,
        access_token: &str,
    ) -> Result<UpstreamIdentity, FederationError> {
        let document = self.discovery().await?;
        let endpoint = document.userinfo_endpoint.as_deref().ok_or_else(|| {
            FederationError::InvalidResponse("no id_token and no userinfo endpoint".into())
        })?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| FederationError::InvalidResponse(format!("userinfo: {e}")))
    }
}

#[async_trait]
impl UpstreamClient for OidcUpstreamClient {
    async fn authorization_url(&self, state: &str) -> Result<Url, FederationError> {
        let document = self.discovery().await?;
        let mut url = Url::parse(&document.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamIdentity, FederationError> {
        let document = self.discovery().await?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        tracing::debug!(token_endpoint = %document.token_endpoint, "exchanging upstream code");
        let response = self
            .http
            .post(&document.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let tokens: UpstreamTokens = response
            .json()
            .await
            .map_err(|e| FederationError::InvalidResponse(format!("token response: {e}")))?;
        match tokens.id_token.as_deref() {
            Some(id_token) => self.identity_from_id_token(id_token).await,
            None => self.identity_from_userinfo(&tokens.access_token).await,
        }
    }
}

//! Partner key sets and JWT-bearer assertion verification.
//!
//! A [`KeySource`] yields the public keys of one trusted issuer, either
//! configured inline ([`StaticKeySource`]) or fetched over HTTP and cached
//! ([`RemoteKeySource`]). [`AssertionVerifier`] picks the source by the
//! assertion's `iss` and checks signature, issuer, audience and expiry.
//!
//! A token whose `kid` is missing from a cached set forces one refetch, so
//! upstream key rotation is picked up before the TTL runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Validation, decode, decode_header};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use url::Url;

use super::error::FederationError;
use super::upstream::{error_from_response, fetch_discovery};
use crate::config::IdpConfig;
use crate::oauth::scope::parse_scopes;
use crate::token::Jwks;

/// Forced refetches of one key set are at least this far apart.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Public keys of one trusted issuer.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Returns the key set. With `refresh`, bypasses any cache.
    async fn jwks(&self, refresh: bool) -> Result<Jwks, FederationError>;
}

/// Key set configured inline.
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    jwks: Jwks,
}

impl StaticKeySource {
    #[must_use]
    pub fn new(jwks: Jwks) -> Self {
        Self { jwks }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn jwks(&self, _refresh: bool) -> Result<Jwks, FederationError> {
        Ok(self.jwks.clone())
    }
}

enum KeyLocation {
    Url(Url),
    Issuer(String),
}

struct CachedJwks {
    jwks: Jwks,
    fetched_at: Instant,
}

/// Key set fetched over HTTP and cached for a TTL.
pub struct RemoteKeySource {
    http: reqwest::Client,
    location: KeyLocation,
    ttl: Duration,
    cache: RwLock<Option<CachedJwks>>,
}

impl RemoteKeySource {
    /// Keys served at a known JWKS URL.
    #[must_use]
    pub fn from_url(http: reqwest::Client, url: Url, ttl: Duration) -> Self {
        Self::with_location(http, KeyLocation::Url(url), ttl)
    }

    /// Keys found through the issuer's OpenID configuration.
    #[must_use]
    pub fn from_issuer(http: reqwest::Client, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self::with_location(http, KeyLocation::Issuer(issuer.into()), ttl)
    }

    fn with_location(http: reqwest::Client, location: KeyLocation, ttl: Duration) -> Self {
        Self {
            http,
            location,
            ttl,
            cache: RwLock::new(None),
        }
    }

    async fn jwks_url(&self) -> Result<Url, FederationError> {
        match &self.location {
            KeyLocation::Url(url) => Ok(url.clone()),
            KeyLocation::Issuer(issuer) => {
                let document = fetch_discovery(&self.http, issuer).await?;
                Ok(Url::parse(&document.jwks_uri)?)
            }
        }
    }

    async fn fetch(&self) -> Result<Jwks, FederationError> {
        let url = self.jwks_url().await?;
        tracing::debug!(jwks_uri = %url, "fetching partner key set");

        let response = self
            .http
            .get(url.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            let err = error_from_response(response).await;
            tracing::warn!(jwks_uri = %url, error = %err, "partner key set fetch failed");
            return Err(err);
        }
        response
            .json::<Jwks>()
            .await
            .map_err(|e| FederationError::InvalidResponse(format!("key set: {e}")))
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    async fn jwks(&self, refresh: bool) -> Result<Jwks, FederationError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.ttl && (!refresh || age < MIN_REFRESH_INTERVAL) {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        let jwks = self.fetch().await?;
        *self.cache.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }
}

/// Verifies a signed token against `source`, refetching once on an
/// unknown `kid`.
pub(crate) async fn decode_with_source<T: DeserializeOwned>(
    token: &str,
    source: &dyn KeySource,
    configure: impl FnOnce(&mut Validation),
) -> Result<T, FederationError> {
    let header = decode_header(token)
        .map_err(|e| FederationError::InvalidAssertion(format!("malformed token: {e}")))?;
    let kid = header.kid.as_deref();

    let mut jwks = source.jwks(false).await?;
    if jwks.find(kid).is_none() {
        jwks = source.jwks(true).await?;
    }
    let jwk = jwks
        .find(kid)
        .ok_or_else(|| FederationError::KeyNotFound(kid.unwrap_or("<none>").to_string()))?;
    let (key, algorithm) = jwk
        .decoding_key()
        .map_err(|e| FederationError::InvalidAssertion(e.to_string()))?;
    if header.alg != algorithm {
        return Err(FederationError::InvalidAssertion(format!(
            "algorithm {:?} does not match key",
            header.alg
        )));
    }

    let mut validation = Validation::new(algorithm);
    configure(&mut validation);
    decode::<T>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => FederationError::InvalidAssertion("token expired".into()),
            _ => FederationError::InvalidAssertion(e.to_string()),
        })
}

/// Verified claims of a JWT-bearer assertion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    /// Space-separated scopes the issuer vouches for.
    #[serde(default)]
    pub scope: Option<String>,
}

impl AssertionClaims {
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.as_deref().map(parse_scopes).unwrap_or_default()
    }
}

/// Verifies RFC 7523 assertions from trusted issuers.
pub struct AssertionVerifier {
    issuers: HashMap<String, Arc<dyn KeySource>>,
    audiences: Vec<String>,
    leeway_secs: u64,
}

impl AssertionVerifier {
    /// A verifier accepting assertions addressed to `audience` (this
    /// server's issuer URL).
    #[must_use]
    pub fn new(audience: impl Into<String>, leeway: Duration) -> Self {
        Self {
            issuers: HashMap::new(),
            audiences: vec![audience.into()],
            leeway_secs: leeway.as_secs(),
        }
    }

    /// Trusts `issuer`, whose keys come from `source`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>, source: Arc<dyn KeySource>) -> Self {
        self.issuers.insert(issuer.into(), source);
        self
    }

    /// Also accepts assertions addressed to `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }

    #[must_use]
    pub fn trusts(&self, issuer: &str) -> bool {
        self.issuers.contains_key(issuer)
    }

    /// Builds the verifier from the `jwt_bearer` section. The delegated
    /// upstream, when configured, is trusted too.
    ///
    /// # Errors
    ///
    /// Returns `Url` for an unparsable JWKS URL.
    pub fn from_config(config: &IdpConfig, http: &reqwest::Client) -> Result<Self, FederationError> {
        let ttl = config.delegated.jwks_cache_ttl;
        let mut verifier = Self::new(config.issuer.clone(), config.oauth.clock_skew);

        for trusted in &config.jwt_bearer.trusted_issuers {
            let source: Arc<dyn KeySource> = match (&trusted.jwks, &trusted.jwks_url) {
                (Some(jwks), _) => Arc::new(StaticKeySource::new(jwks.clone())),
                (None, Some(url)) => {
                    Arc::new(RemoteKeySource::from_url(http.clone(), Url::parse(url)?, ttl))
                }
                (None, None) => Arc::new(RemoteKeySource::from_issuer(
                    http.clone(),
                    trusted.issuer.clone(),
                    ttl,
                )),
            };
            verifier = verifier.with_issuer(trusted.issuer.clone(), source);
        }

        if let Some(upstream) = config.delegated.issuer.as_deref()
            && !verifier.trusts(upstream)
        {
            let source = Arc::new(RemoteKeySource::from_issuer(http.clone(), upstream, ttl));
            verifier = verifier.with_issuer(upstream, source);
        }

        tracing::debug!(trusted_issuers = verifier.issuers.len(), "assertion verifier configured");
        Ok(verifier)
    }

    /// Verifies `assertion` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `UntrustedIssuer` for an unknown `iss`, `KeyNotFound` if no
    /// key matches, and `InvalidAssertion` for a bad signature, audience or
    /// expiry. Key set fetch failures surface as network errors.
    pub async fn verify(&self, assertion: &str) -> Result<AssertionClaims, FederationError> {
        let issuer = peek_issuer(assertion)?;
        let source = self
            .issuers
            .get(&issuer)
            .ok_or_else(|| FederationError::UntrustedIssuer(issuer.clone()))?;

        let claims: AssertionClaims = decode_with_source(assertion, source.as_ref(), |v| {
            v.set_issuer(&[issuer.as_str()]);
            v.set_audience(self.audiences.as_slice());
            v.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
            v.leeway = self.leeway_secs;
        })
        .await?;

        tracing::debug!(issuer = %claims.iss, subject = %claims.sub, "assertion verified");
        Ok(claims)
    }
}

/// Reads `iss` from an unverified token to pick the key source.
fn peek_issuer(token: &str) -> Result<String, FederationError> {
    #[derive(Deserialize)]
    struct Unverified {
        iss: String,
    }

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| FederationError::InvalidAssertion("malformed token".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| FederationError::InvalidAssertion(format!("malformed payload: {e}")))?;
    serde_json::from_slice::<Unverified>(&bytes)
        .map(|claims| claims.iss)
        .map_err(|e| FederationError::InvalidAssertion(format!("missing issuer: {e}")))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{Algorithm, Header, encode};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::token::SigningKey;

    const PARTNER: &str = "https://partner.example.com";
    const LOCAL: &str = "http://localhost:8080";

    fn partner_key() -> SigningKey {
        SigningKey::from_pem(
            include_str!("../../tests/fixtures/partner_key.pem"),
            Some("partner-1".to_string()),
        )
        .unwrap()
    }

    fn assertion(key: &SigningKey, claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, &claims, key.encoding_key()).unwrap()
    }

    fn claims(iss: &str, aud: &str, exp_offset: i64) -> serde_json::Value {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        json!({
            "iss": iss,
            "sub": "partner-user",
            "aud": aud,
            "exp": now + exp_offset,
            "iat": now,
            "scope": "openid scope1",
        })
    }

    fn verifier(key: &SigningKey) -> AssertionVerifier {
        let jwks = Jwks {
            keys: vec![key.to_jwk()],
        };
        AssertionVerifier::new(LOCAL, Duration::from_secs(5))
            .with_issuer(PARTNER, Arc::new(StaticKeySource::new(jwks)))
    }

    #[tokio::test]
    async fn test_verify_valid_assertion() {
        let key = partner_key();
        let verified = verifier(&key)
            .verify(&assertion(&key, claims(PARTNER, LOCAL, 60)))
            .await
            .unwrap();
        assert_eq!(verified.sub, "partner-user");
        assert_eq!(verified.scopes(), vec!["openid", "scope1"]);
    }

    #[tokio::test]
    async fn test_rejects_untrusted_issuer_audience_and_expiry() {
        let key = partner_key();
        let verifier = verifier(&key);

        assert!(matches!(
            verifier
                .verify(&assertion(&key, claims("https://other.example.com", LOCAL, 60)))
                .await,
            Err(FederationError::UntrustedIssuer(_))
        ));
        assert!(matches!(
            verifier
                .verify(&assertion(&key, claims(PARTNER, "https://elsewhere", 60)))
                .await,
            Err(FederationError::InvalidAssertion(_))
        ));
        assert!(matches!(
            verifier
                .verify(&assertion(&key, claims(PARTNER, LOCAL, -120)))
                .await,
            Err(FederationError::InvalidAssertion(_))
        ));
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(FederationError::InvalidAssertion(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_signature() {
        let key = partner_key();
        let impostor = SigningKey::from_pem(
            include_str!("../../tests/fixtures/signing_key.pem"),
            Some("partner-1".to_string()),
        )
        .unwrap();
        assert!(matches!(
            verifier(&key)
                .verify(&assertion(&impostor, claims(PARTNER, LOCAL, 60)))
                .await,
            Err(FederationError::InvalidAssertion(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_source_caches_key_set() {
        let server = MockServer::start().await;
        let key = partner_key();
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Jwks {
                keys: vec![key.to_jwk()],
            }))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let source = RemoteKeySource::from_url(reqwest::Client::new(), url, Duration::from_secs(300));
        let verifier = AssertionVerifier::new(LOCAL, Duration::from_secs(5))
            .with_issuer(PARTNER, Arc::new(source));

        for _ in 0..3 {
            verifier
                .verify(&assertion(&key, claims(PARTNER, LOCAL, 60)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_remote_source_discovers_jwks_uri() {
        let server = MockServer::start().await;
        let key = partner_key();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "jwks_uri": format!("{}/keys", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Jwks {
                keys: vec![key.to_jwk()],
            }))
            .mount(&server)
            .await;

        let source =
            RemoteKeySource::from_issuer(reqwest::Client::new(), server.uri(), Duration::from_secs(300));
        let jwks = source.jwks(false).await.unwrap();
        assert!(jwks.find(Some("partner-1")).is_some());
    }

    #[tokio::test]
    async fn test_remote_source_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let source = RemoteKeySource::from_url(reqwest::Client::new(), url, Duration::from_secs(300));
        let err = source.jwks(false).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Service context.
//!
//! [`IdpContext`] owns every component of the engine: the signing key set,
//! the stores, the grant dispatcher and the delegated bridge. It is built
//! once from an [`IdpConfig`] and a storage backend and handed to whatever
//! needs it; nothing in the crate keeps process-wide state.

use std::sync::Arc;

use crate::AuthResult;
use crate::config::IdpConfig;
use crate::error::AuthError;
use crate::federation::{AssertionVerifier, DelegatedBridge, OidcUpstreamClient};
use crate::grants::{
    AuthorizationCodeGrant, ClientAuthenticator, ClientCredentialsGrant, GrantDispatcher,
    JwtBearerGrant, RefreshTokenGrant,
};
use crate::oauth::AuthRequestStore;
use crate::registry::ClientRegistry;
use crate::storage::Stores;
use crate::token::{JwtSigner, Signer, SigningKey, SigningKeySet, TokenStore};
use crate::vault::SecretVault;

#[derive(Clone)]
pub struct IdpContext {
    pub config: Arc<IdpConfig>,
    pub stores: Stores,
    pub keys: Arc<SigningKeySet>,
    pub vault: SecretVault,
    pub registry: ClientRegistry,
    pub auth_requests: AuthRequestStore,
    pub tokens: TokenStore,
    pub grants: GrantDispatcher,
    pub verifier: Arc<AssertionVerifier>,
    /// Present when an upstream provider is configured.
    pub bridge: Option<Arc<DelegatedBridge>>,
}

impl IdpContext {
    /// Builds the context and seeds static clients.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a missing or unparsable signing key or
    /// federation settings, and storage errors from seeding.
    pub async fn bootstrap(config: IdpConfig, stores: Stores) -> AuthResult<Self> {
        let context = Self::new(config, stores)?;
        context.seed_static_clients().await?;
        Ok(context)
    }

    /// Builds the context with the bundled RS256 signer over the configured
    /// key.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a missing or unparsable signing key or
    /// federation settings.
    pub fn new(config: IdpConfig, stores: Stores) -> AuthResult<Self> {
        let keys = Arc::new(SigningKeySet::new(SigningKey::from_config(&config.signing)?));
        let signer = Arc::new(JwtSigner::new(
            keys.clone(),
            config.issuer.clone(),
            config.oauth.clock_skew.as_secs(),
        ));
        Self::with_signer(config, stores, keys, signer)
    }

    /// Builds the context around an externally provided signer.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid federation settings.
    pub fn with_signer(
        config: IdpConfig,
        stores: Stores,
        keys: Arc<SigningKeySet>,
        signer: Arc<dyn Signer>,
    ) -> AuthResult<Self> {
        let vault = SecretVault::new(&stores, &config.vault)?;
        let registry = ClientRegistry::new(&stores);
        let auth_requests = AuthRequestStore::new(&stores, config.oauth.auth_request_lifetime);
        let tokens = TokenStore::new(&stores, signer, config.issuer.clone(), &config.oauth);
        let authenticator = ClientAuthenticator::new(vault.clone());

        let http = reqwest::Client::builder()
            .timeout(config.delegated.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client: {e}")))?;
        let verifier = Arc::new(AssertionVerifier::from_config(&config, &http)?);

        let grants = GrantDispatcher::new()
            .with_handler(Arc::new(AuthorizationCodeGrant::new(
                authenticator.clone(),
                auth_requests.clone(),
                tokens.clone(),
            )))
            .with_handler(Arc::new(ClientCredentialsGrant::new(
                authenticator.clone(),
                tokens.clone(),
                &config.oauth,
            )))
            .with_handler(Arc::new(RefreshTokenGrant::new(
                authenticator.clone(),
                tokens.clone(),
            )))
            .with_handler(Arc::new(JwtBearerGrant::new(
                authenticator,
                verifier.clone(),
                tokens.clone(),
            )));

        let bridge = if config.delegated.is_enabled() {
            let upstream = OidcUpstreamClient::new(
                http,
                &config.delegated,
                &config.issuer,
                config.oauth.clock_skew,
            )?;
            Some(Arc::new(DelegatedBridge::new(
                Arc::new(upstream),
                auth_requests.clone(),
                &stores,
                &config.delegated,
            )))
        } else {
            None
        };

        tracing::info!(
            issuer = %config.issuer,
            kid = %keys.active().kid,
            grant_types = ?grants.grant_types(),
            delegated = bridge.is_some(),
            "identity provider context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            stores,
            keys,
            vault,
            registry,
            auth_requests,
            tokens,
            grants,
            verifier,
            bridge,
        })
    }

    /// Upserts the clients defined in configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an invalid definition, or a storage
    /// error.
    pub async fn seed_static_clients(&self) -> AuthResult<()> {
        self.registry
            .seed_static(&self.config.clients, &self.vault)
            .await
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Replaces the delegated bridge, e.g. with one over a different
    /// upstream client.
    #[must_use]
    pub fn with_bridge(mut self, bridge: DelegatedBridge) -> Self {
        self.bridge = Some(Arc::new(bridge));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DelegatedConfig, StaticClient, VaultConfig};
    use crate::storage::MemoryStorage;

    fn test_config() -> IdpConfig {
        let mut config = IdpConfig {
            issuer: "https://idp.example.com".to_string(),
            vault: VaultConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
                secret_bytes: 32,
            },
            ..Default::default()
        };
        config.signing.private_key =
            Some(include_str!("../tests/fixtures/signing_key.pem").to_string());
        config
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_static_clients() {
        let mut config = test_config();
        config.clients.push(StaticClient {
            id: "web".to_string(),
            name: "Web".to_string(),
            scopes: vec!["read".to_string()],
            secrets: vec!["static-secret".to_string()],
            ..Default::default()
        });

        let context = IdpContext::bootstrap(config, Stores::from_backend(MemoryStorage::new()))
            .await
            .unwrap();
        assert!(context.vault.verify("web", "static-secret").await.unwrap());
        assert_eq!(context.grants.grant_types().len(), 4);
        assert!(context.bridge.is_none());
    }

    #[test]
    fn test_missing_signing_key() {
        let mut config = test_config();
        config.signing.private_key = None;
        assert!(matches!(
            IdpContext::new(config, Stores::from_backend(MemoryStorage::new())),
            Err(AuthError::Configuration { .. })
        ));
    }

    #[test]
    fn test_delegated_bridge_built_when_configured() {
        let mut config = test_config();
        config.delegated = DelegatedConfig {
            issuer: Some("https://upstream.example.com".to_string()),
            client_id: Some("local".to_string()),
            client_secret: Some("secret".to_string()),
            ..Default::default()
        };
        let context = IdpContext::new(config, Stores::from_backend(MemoryStorage::new())).unwrap();
        assert!(context.bridge.is_some());
        assert!(context.verifier.trusts("https://upstream.example.com"));
    }
}

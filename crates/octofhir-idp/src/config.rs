//! Identity provider configuration.
//!
//! Configuration is layered from an optional file and `OCTOFHIR_IDP__*`
//! environment variables, then validated. Durations use humantime syntax
//! (`"10m"`, `"30d"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! issuer = "https://auth.example.com"
//!
//! [oauth]
//! access_token_lifetime = "15m"
//! check_scopes = true
//!
//! [delegated]
//! issuer = "https://accounts.example.org"
//! client_id = "idp"
//! client_secret = "$UPSTREAM_SECRET"
//!
//! [[clients]]
//! id = "backoffice"
//! name = "Backoffice"
//! trusted = true
//! secrets = ["$BACKOFFICE_SECRET"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::token::keys::Jwks;
use crate::types::{Client, ClientOptions};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdpConfig {
    /// Public base URL, used as the token `iss` claim.
    pub issuer: String,

    pub oauth: OAuthConfig,

    pub vault: VaultConfig,

    pub signing: SigningConfig,

    pub delegated: DelegatedConfig,

    pub jwt_bearer: JwtBearerConfig,

    pub database: DatabaseConfig,

    /// Clients seeded (upserted) at startup.
    pub clients: Vec<StaticClient>,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            oauth: OAuthConfig::default(),
            vault: VaultConfig::default(),
            signing: SigningConfig::default(),
            delegated: DelegatedConfig::default(),
            jwt_bearer: JwtBearerConfig::default(),
            database: DatabaseConfig::default(),
            clients: Vec::new(),
        }
    }
}

/// OAuth 2.0 grant and token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Lifetime of an authorization request (and so of its code).
    #[serde(with = "humantime_serde")]
    pub auth_request_lifetime: Duration,

    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Clock skew tolerated when validating expiry.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Reject client-credentials requests asking for scopes outside the
    /// client's allowed set instead of narrowing them.
    pub check_scopes: bool,

    /// Issue a new refresh token on every refresh.
    pub refresh_token_rotation: bool,

    /// Let trusted public clients use the client-credentials grant without
    /// a secret.
    pub allow_public_client_credentials: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_request_lifetime: Duration::from_secs(600),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            id_token_lifetime: Duration::from_secs(3600),
            clock_skew: Duration::from_secs(5),
            check_scopes: false,
            refresh_token_rotation: true,
            allow_public_client_credentials: false,
        }
    }
}

/// Argon2id parameters for client secret hashing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    /// Random bytes per generated secret.
    pub secret_bytes: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
            secret_bytes: 32,
        }
    }
}

/// Service signing key.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// RSA private key, PKCS#1 or PKCS#8 PEM.
    pub private_key: Option<String>,

    /// File holding the PEM key; used when `private_key` is unset.
    pub private_key_path: Option<PathBuf>,

    /// Key id; defaults to a thumbprint of the public key.
    pub kid: Option<String>,
}

impl SigningConfig {
    /// Returns the configured PEM, reading `private_key_path` if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when neither source is set, or
    /// `ConfigError::InvalidValue` when the file cannot be read.
    pub fn pem(&self) -> Result<String, ConfigError> {
        if let Some(pem) = &self.private_key {
            return Ok(pem.clone());
        }
        let path = self
            .private_key_path
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("signing.private_key".to_string()))?;
        std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidValue(format!(
                "cannot read signing key {}: {e}",
                path.display()
            ))
        })
    }
}

/// Upstream identity provider used for delegated login.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelegatedConfig {
    /// Upstream issuer; delegation is disabled when unset.
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Callback URL registered upstream. Defaults to
    /// `{issuer}/authorize/callback`.
    pub redirect_url: Option<String>,

    pub scopes: Vec<String>,

    /// Bound on every upstream call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Attempts for transient failures, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for DelegatedConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: None,
            client_secret: None,
            redirect_url: None,
            scopes: vec!["openid".to_string(), "email".to_string()],
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            jwks_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl DelegatedConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.issuer.is_some()
    }

    /// Callback URL for this service at `local_issuer`.
    #[must_use]
    pub fn redirect_url_for(&self, local_issuer: &str) -> String {
        self.redirect_url.clone().unwrap_or_else(|| {
            format!("{}/authorize/callback", local_issuer.trim_end_matches('/'))
        })
    }
}

/// Issuers whose assertions the JWT-bearer grant accepts.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtBearerConfig {
    pub trusted_issuers: Vec<TrustedIssuer>,
}

/// A trusted assertion issuer and where its public keys come from.
///
/// With neither `jwks` nor `jwks_url`, keys are discovered from the issuer's
/// OpenID configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrustedIssuer {
    pub issuer: String,
    #[serde(default)]
    pub jwks: Option<Jwks>,
    #[serde(default)]
    pub jwks_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Client defined in configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticClient {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub public: bool,
    pub trusted: bool,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Plaintext secrets; `$NAME` reads environment variable `NAME`.
    pub secrets: Vec<String>,
}

impl StaticClient {
    /// Builds the client record this definition seeds.
    #[must_use]
    pub fn to_client(&self) -> Client {
        Client::from_options(
            self.id.clone(),
            ClientOptions {
                name: if self.name.is_empty() {
                    self.id.clone()
                } else {
                    self.name.clone()
                },
                description: self.description.clone(),
                public: self.public,
                trusted: self.trusted,
                redirect_uris: self.redirect_uris.clone(),
                post_logout_redirect_uris: self.post_logout_redirect_uris.clone(),
                scopes: self.scopes.clone(),
                metadata: self.metadata.clone(),
            },
        )
    }

    /// Replaces `$NAME` secrets with the value of environment variable `NAME`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a referenced variable is unset.
    pub fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        for secret in &mut self.secrets {
            if let Some(var) = secret.strip_prefix('$') {
                *secret = std::env::var(var).map_err(|_| {
                    ConfigError::Missing(format!(
                        "environment variable {var} for a secret of client {}",
                        self.id
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::configuration(err.to_string())
    }
}

impl IdpConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::Missing` if:
    /// - The issuer is empty
    /// - A lifetime or vault parameter is zero
    /// - Delegation is enabled without client credentials
    /// - A static client has no id, or two share one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        let lifetimes = [
            ("oauth.auth_request_lifetime", self.oauth.auth_request_lifetime),
            ("oauth.access_token_lifetime", self.oauth.access_token_lifetime),
            ("oauth.refresh_token_lifetime", self.oauth.refresh_token_lifetime),
            ("oauth.id_token_lifetime", self.oauth.id_token_lifetime),
        ];
        for (name, lifetime) in lifetimes {
            if lifetime.as_secs() == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at least one second"
                )));
            }
        }

        if self.vault.memory_kib == 0
            || self.vault.iterations == 0
            || self.vault.parallelism == 0
        {
            return Err(ConfigError::InvalidValue(
                "vault hashing parameters must be > 0".to_string(),
            ));
        }
        if self.vault.secret_bytes < 16 {
            return Err(ConfigError::InvalidValue(
                "vault.secret_bytes must be at least 16".to_string(),
            ));
        }

        if self.delegated.is_enabled() {
            if self.delegated.client_id.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Missing("delegated.client_id".to_string()));
            }
            if self
                .delegated
                .client_secret
                .as_deref()
                .is_none_or(str::is_empty)
            {
                return Err(ConfigError::Missing("delegated.client_secret".to_string()));
            }
            if self.delegated.max_attempts == 0 {
                return Err(ConfigError::InvalidValue(
                    "delegated.max_attempts must be > 0".to_string(),
                ));
            }
            if self.delegated.request_timeout.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "delegated.request_timeout must be > 0".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            if client.id.trim().is_empty() {
                return Err(ConfigError::Missing("clients[].id".to_string()));
            }
            if !seen.insert(client.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate static client id: {}",
                    client.id
                )));
            }
        }

        Ok(())
    }

    /// Resolves `$NAME` references in static client secrets.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a referenced variable is unset.
    pub fn resolve_environment(&mut self) -> Result<(), ConfigError> {
        for client in &mut self.clients {
            client.resolve_secrets()?;
        }
        Ok(())
    }
}

/// Loads configuration from `path` (if given and present) and
/// `OCTOFHIR_IDP__*` environment variables, e.g.
/// `OCTOFHIR_IDP__OAUTH__CHECK_SCOPES=true`.
///
/// # Errors
///
/// Returns `ConfigError` if the sources cannot be merged, a referenced
/// environment variable is missing, or validation fails.
pub fn load_config(path: Option<&Path>) -> Result<IdpConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path
        && path.exists()
    {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix("OCTOFHIR_IDP")
            .prefix_separator("__")
            .try_parsing(true)
            .separator("__"),
    );

    let mut config: IdpConfig = builder
        .build()
        .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

    config.resolve_environment()?;
    config.validate()?;
    Ok(config)
}

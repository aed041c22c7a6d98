//! Client secret vault.
//!
//! Secrets are random 256-bit values (by default) encoded as base64url. Only
//! an Argon2id PHC string is persisted; the plaintext leaves the vault once,
//! inside the [`CreatedSecret`] returned by [`SecretVault::create`].
//!
//! Hashing and verification are CPU-bound and run on the blocking pool.
//!
//! # Example
//!
//! ```ignore
//! let created = vault.create("backoffice", Some("ci".into()), Default::default()).await?;
//! assert!(vault.verify("backoffice", &created.clear).await?);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::VaultConfig;
use crate::error::AuthError;
use crate::storage::{ClientStorage, SecretStorage, Stores};
use crate::types::secret::last_digits;
use crate::types::{Client, CreatedSecret, Secret};

/// Prefix of secret ids seeded from configuration.
pub const STATIC_SECRET_PREFIX: &str = "static-";

/// Argon2id hasher with fixed cost parameters.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    /// Builds a hasher from vault parameters.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if Argon2 rejects the parameters.
    pub fn new(config: &VaultConfig) -> AuthResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::configuration(format!("invalid vault parameters: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hashes a plaintext with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if hashing fails or the blocking task panics.
    pub async fn hash(&self, plaintext: String) -> AuthResult<String> {
        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AuthError::internal(format!("secret hashing failed: {e}")))
        })
        .await
        .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
    }

    /// Returns `true` if `candidate` matches any of `hashes`.
    ///
    /// Parameters are read from each PHC string, so hashes made with older
    /// cost settings still verify. Malformed hashes never match.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the blocking task panics.
    pub async fn verify_any(&self, candidate: String, hashes: Vec<String>) -> AuthResult<bool> {
        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || {
            hashes.iter().any(|stored| match PasswordHash::new(stored) {
                Ok(parsed) => argon2
                    .verify_password(candidate.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed secret hash");
                    false
                }
            })
        })
        .await
        .map_err(|e| AuthError::internal(format!("verification task failed: {e}")))
    }
}

/// Creates, verifies and deletes client secrets.
#[derive(Clone)]
pub struct SecretVault {
    clients: Arc<dyn ClientStorage>,
    secrets: Arc<dyn SecretStorage>,
    hasher: SecretHasher,
    secret_bytes: usize,
}

impl SecretVault {
    /// # Errors
    ///
    /// Returns `Configuration` if the vault parameters are invalid.
    pub fn new(stores: &Stores, config: &VaultConfig) -> AuthResult<Self> {
        Ok(Self {
            clients: stores.clients.clone(),
            secrets: stores.secrets.clone(),
            hasher: SecretHasher::new(config)?,
            secret_bytes: config.secret_bytes,
        })
    }

    /// Generates, hashes and stores a new secret for `client_id`.
    ///
    /// The returned value is the only place the plaintext ever appears.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub async fn create(
        &self,
        client_id: &str,
        name: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> AuthResult<CreatedSecret> {
        if self.clients.find_client(client_id).await?.is_none() {
            return Err(AuthError::not_found("client", client_id));
        }

        let clear = self.generate_plaintext();
        let secret = Secret {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            name: name.clone(),
            hash: self.hasher.hash(clear.clone()).await?,
            last_digits: last_digits(&clear),
            metadata,
            created_at: crate::now_seconds(),
        };
        self.secrets.create_secret(&secret).await?;

        tracing::info!(client_id, secret_id = %secret.id, "client secret created");

        Ok(CreatedSecret {
            id: secret.id,
            name,
            last_digits: secret.last_digits,
            clear,
        })
    }

    /// Returns `true` if `candidate` matches one of the client's secrets.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the secrets cannot be loaded.
    pub async fn verify(&self, client_id: &str, candidate: &str) -> AuthResult<bool> {
        let hashes: Vec<String> = self
            .secrets
            .list_secrets(client_id)
            .await?
            .into_iter()
            .map(|s| s.hash)
            .collect();
        if hashes.is_empty() {
            return Ok(false);
        }
        self.hasher.verify_any(candidate.to_string(), hashes).await
    }

    /// Looks up the client a secret would belong to.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_client(&self, client_id: &str) -> AuthResult<Option<Client>> {
        self.clients.find_client(client_id).await
    }

    /// Authenticates a confidential client by secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` if the client is unknown or no secret matches.
    pub async fn authenticate(&self, client_id: &str, candidate: &str) -> AuthResult<Client> {
        let client = self
            .clients
            .find_client(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;

        if !self.verify(client_id, candidate).await? {
            tracing::warn!(client_id, "client secret mismatch");
            return Err(AuthError::invalid_client("client secret mismatch"));
        }
        Ok(client)
    }

    /// Deletes a secret.
    ///
    /// Deleting the last secret of a confidential client is allowed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the secret does not belong to the client.
    pub async fn delete(&self, client_id: &str, secret_id: &str) -> AuthResult<()> {
        if !self.secrets.delete_secret(client_id, secret_id).await? {
            return Err(AuthError::not_found("secret", secret_id));
        }
        tracing::info!(client_id, secret_id, "client secret deleted");
        Ok(())
    }

    /// Replaces a static client's configured secrets.
    ///
    /// Secrets get ids `static-0`, `static-1`, ... so reseeding overwrites
    /// instead of duplicating; static ids beyond the new list are removed.
    /// Secrets created at runtime are left alone.
    ///
    /// # Errors
    ///
    /// Returns a storage or hashing error.
    pub async fn seed_static(&self, client_id: &str, plaintexts: &[String]) -> AuthResult<()> {
        for (n, clear) in plaintexts.iter().enumerate() {
            let secret = Secret {
                id: format!("{STATIC_SECRET_PREFIX}{n}"),
                client_id: client_id.to_string(),
                name: None,
                hash: self.hasher.hash(clear.clone()).await?,
                last_digits: last_digits(clear),
                metadata: BTreeMap::new(),
                created_at: crate::now_seconds(),
            };
            self.secrets.upsert_secret(&secret).await?;
        }

        for stale in self.secrets.list_secrets(client_id).await? {
            let index = stale
                .id
                .strip_prefix(STATIC_SECRET_PREFIX)
                .and_then(|n| n.parse::<usize>().ok());
            if index.is_some_and(|n| n >= plaintexts.len()) {
                self.secrets.delete_secret(client_id, &stale.id).await?;
            }
        }
        Ok(())
    }

    fn generate_plaintext(&self) -> String {
        let mut bytes = vec![0u8; self.secret_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[cfg(test)]
pub(crate) fn test_vault_config() -> VaultConfig {
    VaultConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
        secret_bytes: 32,
    }
}

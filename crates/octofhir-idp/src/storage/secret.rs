//! Client secret storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Secret;

/// Storage operations for hashed client secrets.
#[async_trait]
pub trait SecretStorage: Send + Sync {
    /// Store a new secret.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owning client does not exist, or `Conflict`
    /// if the secret id is already used by that client.
    async fn create_secret(&self, secret: &Secret) -> AuthResult<()>;

    /// Insert or replace a secret by `(client_id, id)`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owning client does not exist.
    async fn upsert_secret(&self, secret: &Secret) -> AuthResult<()>;

    /// All secrets of a client, oldest first, hashes included.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_secrets(&self, client_id: &str) -> AuthResult<Vec<Secret>>;

    /// Delete one secret. Returns `false` if it did not belong to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_secret(&self, client_id: &str, secret_id: &str) -> AuthResult<bool>;
}

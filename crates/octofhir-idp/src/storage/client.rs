//! Client storage trait.
//!
//! Defines the interface for OAuth client persistence operations.
//! Implementations are provided by storage backends (in-memory, PostgreSQL).

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::Client;

/// Edit applied to the locked stored client by
/// [`ClientStorage::update_client`]. An error leaves the row untouched.
pub type ClientUpdate<'a> = &'a (dyn Fn(&mut Client) -> AuthResult<()> + Send + Sync);

// =============================================================================
// Client Storage Trait
// =============================================================================

/// Storage operations for OAuth 2.0 clients.
///
/// Returned clients carry their secret summaries; secret hashes are only
/// reachable through [`super::SecretStorage`].
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_client(&self, id: &str) -> AuthResult<Option<Client>>;

    /// Insert a new client.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a client with the same id exists.
    async fn create_client(&self, client: &Client) -> AuthResult<()>;

    /// Insert or replace a client definition, keeping its secrets.
    ///
    /// Used to re-seed configuration-defined clients on every start.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert_client(&self, client: &Client) -> AuthResult<()>;

    /// Atomically read a client, run `update` on it and store the result.
    ///
    /// The client passed to `update` has no secret summaries; the returned
    /// one does. Concurrent updates of one client are serialized, so none
    /// is lost.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist, or the error of
    /// `update`.
    async fn update_client(&self, id: &str, update: ClientUpdate<'_>) -> AuthResult<Client>;

    /// Delete a client in one transaction: its secrets and auth requests
    /// are removed and its outstanding tokens revoked at `revoked_at`.
    ///
    /// Returns `false` if the client did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_client(&self, id: &str, revoked_at: OffsetDateTime) -> AuthResult<bool>;

    /// List clients ordered by id, starting strictly after `after`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_clients(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<Client>>;
}

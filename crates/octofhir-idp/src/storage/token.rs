//! Token storage trait.
//!
//! Tokens are append-only records; the only in-place changes are the
//! revocation timestamp and the link columns (`refresh_token_id`,
//! `replaced_by`).

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::Token;

/// Storage operations for issued tokens.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Store a new token record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn insert_token(&self, token: &Token) -> AuthResult<()>;

    /// Store a refresh token and link it to its access token in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the access token does not exist.
    async fn attach_refresh_token(&self, access_token_id: Uuid, refresh: &Token)
    -> AuthResult<()>;

    /// Find a token by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_token(&self, id: Uuid) -> AuthResult<Option<Token>>;

    /// Find a token by the hash of its opaque value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_token_by_hash(&self, token_hash: &str) -> AuthResult<Option<Token>>;

    /// Revoke a token and its linked access/refresh counterpart.
    ///
    /// Returns `false` if the id is unknown. Revoking an already revoked
    /// token succeeds and keeps the original timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_token(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<bool>;

    /// Rotate a refresh token in one transaction: the old record is revoked
    /// with `replaced_by` pointing at `new_refresh`, and the new access and
    /// refresh records are inserted and linked.
    ///
    /// The revocation is a compare-and-swap on the old record still being
    /// live, so two concurrent rotations of one refresh token cannot both
    /// succeed.
    ///
    /// # Errors
    ///
    /// Returns `TokenRevoked` if the old record was already revoked, or
    /// `NotFound` if it does not exist.
    async fn rotate_refresh_token(
        &self,
        old_refresh_id: Uuid,
        new_access: &Token,
        new_refresh: &Token,
        at: OffsetDateTime,
    ) -> AuthResult<()>;

    /// Delete tokens that expired before `now`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> AuthResult<u64>;
}

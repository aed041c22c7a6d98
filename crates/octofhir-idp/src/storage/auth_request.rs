//! Authorization request storage trait.
//!
//! # Implementation Notes
//!
//! [`AuthRequestStorage::consume_auth_request`] is the replay barrier of the
//! authorization-code flow. Implementations must make the read-check-write
//! atomic in the backing store itself (row lock or compare-and-swap on the
//! consumed flag); an in-process lock is not enough once several server
//! instances share one database.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::AuthRequest;

/// Check run against the locked request before it is marked consumed.
pub type ConsumeGuard<'a> = &'a (dyn Fn(&AuthRequest) -> AuthResult<()> + Send + Sync);

/// Storage operations for in-flight authorization requests.
#[async_trait]
pub trait AuthRequestStorage: Send + Sync {
    /// Store a new request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    async fn create_auth_request(&self, request: &AuthRequest) -> AuthResult<()>;

    /// Find a request by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthRequest>>;

    /// Record the hash of the state sent upstream for a pending request,
    /// replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown and `Conflict` if the request
    /// is no longer pending.
    async fn set_upstream_state(&self, id: Uuid, state_hash: &str) -> AuthResult<()>;

    /// Find a request by the hash of its upstream state.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_auth_request_by_upstream_state(
        &self,
        state_hash: &str,
    ) -> AuthResult<Option<AuthRequest>>;

    /// Bind `subject` to the request and mark it done.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown and `Conflict` if the request
    /// was already consumed.
    async fn authenticate_auth_request(&self, id: Uuid, subject: &str)
    -> AuthResult<AuthRequest>;

    /// Atomically lock the request, run `guard` on it and mark it consumed.
    ///
    /// Exactly one of any number of concurrent calls for the same id can
    /// succeed; the rest observe the consumed request and fail with
    /// `Replay` (or whatever `guard` reports first).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, the guard's error, or `Replay`.
    async fn consume_auth_request(
        &self,
        id: Uuid,
        consumed_at: OffsetDateTime,
        guard: ConsumeGuard<'_>,
    ) -> AuthResult<AuthRequest>;

    /// Delete requests that expired before `now`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired_auth_requests(&self, now: OffsetDateTime) -> AuthResult<u64>;
}

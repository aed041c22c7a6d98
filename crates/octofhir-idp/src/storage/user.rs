//! User storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::User;

/// Storage operations for federated users.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Return the user with `subject`, creating it when absent. A provided
    /// `email` replaces the stored one.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert_user(&self, subject: &str, email: Option<&str>) -> AuthResult<User>;

    /// Find a user by local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_user(&self, id: &str) -> AuthResult<Option<User>>;

    /// List users ordered by id, starting strictly after `after`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_users(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<User>>;
}

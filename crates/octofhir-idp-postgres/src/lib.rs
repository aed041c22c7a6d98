//! PostgreSQL storage backend for octofhir-idp
//!
//! Implements every storage trait of the core crate over one connection
//! pool:
//!
//! - OAuth clients and their hashed secrets
//! - In-flight authorization requests
//! - Access, refresh and ID token records
//! - Users bound through delegated login
//!
//! Check-and-set operations (authorization request consumption, refresh
//! token rotation) run in a transaction holding a row lock, so they stay
//! atomic across server instances sharing the database.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_idp::{IdpContext, Stores};
//! use octofhir_idp_postgres::PostgresIdpStorage;
//!
//! let storage = PostgresIdpStorage::connect("postgres://localhost/idp", 10).await?;
//! storage.migrate().await?;
//! let context = IdpContext::bootstrap(config, Stores::from_backend(storage)).await?;
//! ```

pub mod auth_request;
pub mod client;
pub mod health;
pub mod schema;
pub mod secret;
pub mod token;
pub mod user;

use std::sync::Arc;

use octofhir_idp::AuthError;
use octofhir_idp::config::DatabaseConfig;
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input data, or a stored value that no longer parses.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Map a failed insert: unique violations become `Conflict`, foreign key
    /// violations `NotFound`.
    pub(crate) fn on_insert(err: sqlx_core::Error, what: &str) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::conflict(format!("{what} already exists"));
            }
            if db_err.is_foreign_key_violation() {
                return Self::not_found(format!("owner of {what}"));
            }
        }
        Self::from(err)
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    /// Returns `true` if this is a serialization error.
    #[must_use]
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Returns `true` if this is an invalid input error.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Returns `true` if this is a client error (4xx equivalent).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Conflict(_) | Self::InvalidInput(_)
        )
    }

    /// Returns `true` if this is a server error (5xx equivalent).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_))
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => AuthError::conflict(message),
            StorageError::InvalidInput(message) => AuthError::storage(message),
            StorageError::NotFound(what) => AuthError::storage(format!("missing row: {what}")),
            StorageError::Database(e) => {
                tracing::error!(error = %e, "database operation failed");
                AuthError::storage(e.to_string())
            }
            StorageError::Serialization(e) => AuthError::storage(e.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Convert a raw driver error for the core traits.
pub(crate) fn db_error(err: sqlx_core::Error) -> AuthError {
    StorageError::from(err).into()
}

// =============================================================================
// PostgreSQL IdP Storage
// =============================================================================

/// PostgreSQL storage backend for the identity provider.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresIdpStorage {
    pool: Arc<PgPool>,
}

impl PostgresIdpStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "connected to identity provider database");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Connect using the `database` section of the provider configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when no URL is configured, or the connection
    /// error.
    pub async fn from_config(config: &DatabaseConfig) -> StorageResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StorageError::invalid_input("database.url is not configured"))?;
        Self::connect(url, config.max_connections).await
    }

    /// Create the identity provider tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        schema::create_tables(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the Arc-wrapped pool.
    #[must_use]
    pub fn pool_arc(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::not_found("client abc123");
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert_eq!(err.to_string(), "Not found: client abc123");
    }

    #[test]
    fn test_storage_error_conflict() {
        let err = StorageError::conflict("client already exists");
        assert!(err.is_conflict());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_storage_error_invalid_input() {
        let err = StorageError::invalid_input("unknown token kind");
        assert!(err.is_invalid_input());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_storage_error_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(err.is_serialization_error());
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_conflict_maps_to_auth_conflict() {
        let err = AuthError::from(StorageError::conflict("client web already exists"));
        assert!(matches!(err, AuthError::Conflict { .. }));
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[test]
    fn test_server_errors_map_to_storage() {
        let err = AuthError::from(StorageError::Database(sqlx_core::Error::PoolTimedOut));
        assert!(matches!(err, AuthError::Storage { .. }));
        assert!(err.is_server_error());

        let err = AuthError::from(StorageError::invalid_input("bad kind"));
        assert!(matches!(err, AuthError::Storage { .. }));
    }

    #[test]
    fn test_from_config_requires_url() {
        let err = tokio_test::block_on(PostgresIdpStorage::from_config(&DatabaseConfig::default()))
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_other_insert_failures_stay_database_errors() {
        let err = StorageError::on_insert(sqlx_core::Error::RowNotFound, "client web");
        assert!(err.is_database_error());
    }
}

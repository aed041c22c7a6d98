//! Storage traits for identity and grant data.
//!
//! This module defines storage interfaces for:
//!
//! - OAuth client registrations and their hashed secrets
//! - In-flight authorization requests
//! - Access, refresh and ID token records
//! - Users established through delegated authentication
//!
//! # Implementations
//!
//! - [`memory::MemoryStorage`] - single-process backend used by tests
//! - `octofhir-idp-postgres` - PostgreSQL storage backend

pub mod auth_request;
pub mod client;
pub mod memory;
pub mod secret;
pub mod token;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;

pub use auth_request::{AuthRequestStorage, ConsumeGuard};
pub use client::{ClientStorage, ClientUpdate};
pub use memory::MemoryStorage;
pub use secret::SecretStorage;
pub use token::TokenStorage;
pub use user::UserStorage;

/// Backend liveness check.
#[async_trait]
pub trait StorageHealth: Send + Sync {
    /// # Errors
    ///
    /// Returns a `Storage` error if the backend is unreachable.
    async fn health(&self) -> AuthResult<()>;
}

/// A backend implementing every storage trait.
pub trait StorageBackend:
    ClientStorage
    + SecretStorage
    + AuthRequestStorage
    + TokenStorage
    + UserStorage
    + StorageHealth
    + 'static
{
}

impl<T> StorageBackend for T where
    T: ClientStorage
        + SecretStorage
        + AuthRequestStorage
        + TokenStorage
        + UserStorage
        + StorageHealth
        + 'static
{
}

/// Per-concern handles onto one storage backend.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ClientStorage>,
    pub secrets: Arc<dyn SecretStorage>,
    pub auth_requests: Arc<dyn AuthRequestStorage>,
    pub tokens: Arc<dyn TokenStorage>,
    pub users: Arc<dyn UserStorage>,
    pub health: Arc<dyn StorageHealth>,
}

impl Stores {
    /// Shares one backend across all handles.
    pub fn from_backend<B: StorageBackend>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Shares an already shared backend across all handles.
    pub fn from_arc<B: StorageBackend>(backend: Arc<B>) -> Self {
        Self {
            clients: backend.clone(),
            secrets: backend.clone(),
            auth_requests: backend.clone(),
            tokens: backend.clone(),
            users: backend.clone(),
            health: backend,
        }
    }
}

/// Page size used when a listing does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Largest page a listing returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Cursor for the next page, absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// Builds a page from up to `limit + 1` rows fetched after a cursor.
    ///
    /// The extra row only signals that another page exists and is dropped.
    pub fn from_rows(mut rows: Vec<T>, limit: usize, id_of: impl Fn(&T) -> &str) -> Self {
        let next = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|last| encode_cursor(id_of(last)))
        } else {
            None
        };
        Self { data: rows, next }
    }
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
#[must_use]
pub fn page_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

/// Encodes the last id of a page as an opaque cursor.
#[must_use]
pub fn encode_cursor(last_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(last_id.as_bytes())
}

/// Decodes a cursor produced by [`encode_cursor`].
///
/// # Errors
///
/// Returns `InvalidRequest` for a cursor that was not produced here.
pub fn decode_cursor(cursor: &str) -> AuthResult<String> {
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AuthError::invalid_request("invalid pagination cursor"))
}

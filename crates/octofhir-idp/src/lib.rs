//! # octofhir-idp
//!
//! Identity and grant storage engine for an OAuth 2.0 / OpenID Connect
//! authorization server.
//!
//! This crate provides:
//! - A secret vault hashing client secrets with Argon2id
//! - A client registry with static (configuration-seeded) clients
//! - One-time authorization requests with PKCE
//! - Access, refresh and ID token issuance, validation and revocation
//! - Grant handlers for `authorization_code`, `client_credentials`,
//!   `refresh_token` and the JWT-bearer assertion grant
//! - Delegated login through an upstream OpenID provider
//! - A storage facade that is the single entry point for a provider runtime
//!
//! ## Modules
//!
//! - [`config`] - Configuration types and loading
//! - [`context`] - Explicitly constructed service context
//! - [`facade`] - The provider-facing storage facade
//! - [`federation`] - Upstream delegation and partner key sets
//! - [`grants`] - Per-grant-type token endpoint logic
//! - [`middleware`] - Strict bearer-token verification for axum routes
//! - [`oauth`] - PKCE, scopes and the authorization request store
//! - [`registry`] - Client CRUD
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`token`] - Signing keys, the signer capability and the token store
//! - [`vault`] - Client secret hashing and verification

pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod federation;
pub mod grants;
pub mod middleware;
pub mod oauth;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod token;
pub mod types;
pub mod vault;

pub use config::{ConfigError, IdpConfig, load_config};
pub use context::IdpContext;
pub use error::{AuthError, ErrorCategory};
pub use facade::{OidcStorage, StorageFacade};
pub use grants::{GrantType, TokenRequest, TokenResponse};
pub use storage::{MemoryStorage, Page, StorageBackend, Stores};
pub use token::{JwtSigner, Signer, SigningKey, SigningKeySet};
pub use types::{
    AuthRequest, Claims, Client, ClientOptions, ClientPatch, CreatedSecret, Secret, SecretSummary,
    Token, TokenKind, User,
};

/// Type alias for identity provider results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Current time truncated to whole seconds.
///
/// Every persisted timestamp goes through this so expiry comparisons are
/// second-granular on every backend.
pub fn now_seconds() -> time::OffsetDateTime {
    let now = time::OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_idp::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{IdpConfig, load_config};
    pub use crate::context::IdpContext;
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::facade::{OidcStorage, StorageFacade};
    pub use crate::grants::{GrantType, TokenRequest, TokenResponse};
    pub use crate::storage::{MemoryStorage, Page, Stores};
    pub use crate::token::{Signer, SigningKeySet};
    pub use crate::types::{Claims, Client, ClientOptions, ClientPatch, CreatedSecret, TokenKind};
}

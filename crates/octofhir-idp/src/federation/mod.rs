//! Upstream identity providers and partner key sets.
//!
//! - [`upstream`] - OpenID discovery and the authorization code client used
//!   for delegated login
//! - [`bridge`] - Drives an authorization request through the upstream and
//!   binds the resulting user
//! - [`jwks`] - Key sources and verification of partner-signed assertions
//! - [`error`] - Upstream failures and their retry classification

pub mod bridge;
pub mod error;
pub mod jwks;
pub mod upstream;

pub use bridge::{CallbackParams, DelegatedBridge};
pub use error::FederationError;
pub use jwks::{
    AssertionClaims, AssertionVerifier, KeySource, RemoteKeySource, StaticKeySource,
};
pub use upstream::{
    DiscoveryDocument, OidcUpstreamClient, UpstreamClient, UpstreamIdentity, fetch_discovery,
};

//! OAuth 2.0 building blocks.
//!
//! - [`pkce`] - PKCE challenge/verifier implementation
//! - [`scope`] - Scope parsing and narrowing against a client's allowed set
//! - [`auth_request`] - One-time authorization requests and code exchange

pub mod auth_request;
pub mod pkce;
pub mod scope;

pub use auth_request::AuthRequestStore;
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use scope::{join_scopes, parse_scopes};

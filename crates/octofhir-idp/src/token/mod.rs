//! Token issuance, validation and signing.
//!
//! This module provides:
//!
//! - [`keys`] - RSA signing keys, the rotatable key set and JWKS types
//! - [`signer`] - The [`Signer`] capability and its RS256 implementation
//! - [`store`] - Access/refresh/ID token issuance, refresh rotation and
//!   revocation

pub mod keys;
pub mod signer;
pub mod store;

pub use keys::{Jwk, Jwks, SigningKey, SigningKeySet};
pub use signer::{JwtSigner, Signer};
pub use store::{RefreshedTokens, TokenGrant, TokenStore};

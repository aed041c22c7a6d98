//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! Both `S256` and `plain` challenge methods are accepted, matching what
//! upstream OIDC providers advertise. A challenge without an explicit method
//! is treated as `plain` per the RFC.
//!
//! # Example
//!
//! ```
//! use octofhir_idp::oauth::pkce::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert_eq!(challenge.method(), PkceChallengeMethod::S256);
//! assert!(challenge.verify(verifier.as_str()).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be unreserved ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Unsupported challenge method.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),

    /// Verifier doesn't match challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Get the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidVerifierLength(_)
            | Self::InvalidVerifierCharacters
            | Self::UnsupportedMethod(_) => "invalid_request",
            Self::VerificationFailed => "invalid_grant",
        }
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkceChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`.
    S256,
    /// Challenge equals the verifier.
    #[serde(rename = "plain")]
    Plain,
}

impl PkceChallengeMethod {
    /// Parse challenge method from string.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything other than
    /// `S256` or `plain`.
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier: 43-128 unreserved characters.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not between 43 and 128 characters
    /// or the string contains characters other than `[A-Za-z0-9-._~]`.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }
        if !verifier.chars().all(is_unreserved) {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// Generate a random verifier (32 bytes, base64url, 43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// Stored PKCE code challenge together with its method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    value: String,
    method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Wraps a challenge received from a client.
    #[must_use]
    pub fn new(value: String, method: PkceChallengeMethod) -> Self {
        Self { value, method }
    }

    /// Computes the `S256` challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        Self {
            value: s256(verifier.as_str()),
            method: PkceChallengeMethod::S256,
        }
    }

    /// Verifies a raw verifier string against this challenge.
    ///
    /// # Errors
    ///
    /// Returns a verifier format error, or `VerificationFailed` on mismatch.
    pub fn verify(&self, verifier: &str) -> Result<(), PkceError> {
        let verifier = PkceVerifier::new(verifier.to_string())?;
        let expected = match self.method {
            PkceChallengeMethod::S256 => s256(verifier.as_str()),
            PkceChallengeMethod::Plain => verifier.0,
        };
        if constant_time_eq(expected.as_bytes(), self.value.as_bytes()) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        self.method
    }
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Length-revealing, content-constant comparison.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

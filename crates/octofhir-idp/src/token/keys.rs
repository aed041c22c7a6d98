//! Signing keys and JSON Web Key Sets.
//!
//! The service signs with one active RSA key. The key set lives behind an
//! [`ArcSwap`], so readers never lock and a rotation replaces the whole set
//! in one atomic store. The previous key stays available for verification
//! (and in the exported JWKS) until the next rotation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::AuthResult;
use crate::config::SigningConfig;
use crate::error::AuthError;

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Finds a key by id. Without a `kid`, a set holding exactly one key
    /// returns that key.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}

/// JSON Web Key (RSA or EC public key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key use ("sig" for signing).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    // RSA-specific fields
    /// RSA modulus (base64url encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC-specific fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Builds the verification key and algorithm for this JWK.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for unsupported key types or malformed
    /// components.
    pub fn decoding_key(&self) -> AuthResult<(DecodingKey, Algorithm)> {
        let invalid = |e: jsonwebtoken::errors::Error| {
            AuthError::invalid_token(format!("unusable JWK: {e}"))
        };
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("RSA", _) => {
                let (n, e) = self
                    .n
                    .as_deref()
                    .zip(self.e.as_deref())
                    .ok_or_else(|| AuthError::invalid_token("RSA JWK without n/e"))?;
                let algorithm = match self.alg.as_deref() {
                    Some("RS384") => Algorithm::RS384,
                    Some("RS512") => Algorithm::RS512,
                    _ => Algorithm::RS256,
                };
                Ok((DecodingKey::from_rsa_components(n, e).map_err(invalid)?, algorithm))
            }
            ("EC", Some(crv @ ("P-256" | "P-384"))) => {
                let (x, y) = self
                    .x
                    .as_deref()
                    .zip(self.y.as_deref())
                    .ok_or_else(|| AuthError::invalid_token("EC JWK without x/y"))?;
                let algorithm = if crv == "P-256" {
                    Algorithm::ES256
                } else {
                    Algorithm::ES384
                };
                Ok((DecodingKey::from_ec_components(x, y).map_err(invalid)?, algorithm))
            }
            (kty, crv) => Err(AuthError::invalid_token(format!(
                "unsupported JWK type {kty} {}",
                crv.unwrap_or_default()
            ))),
        }
    }
}

// ============================================================================
// Signing Key
// ============================================================================

/// RSA private key used to sign tokens (RS256).
pub struct SigningKey {
    pub kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Loads a key from PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
    /// (`PRIVATE KEY`) PEM. Without a `kid`, the RFC 7638 thumbprint of the
    /// public key is used.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the PEM is not an RSA private key.
    pub fn from_pem(pem: &str, kid: Option<String>) -> AuthResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| AuthError::configuration(format!("invalid RSA private key: {e}")))?;

        let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
        let kid = kid.unwrap_or_else(|| thumbprint(&n, &e));

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::configuration(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| AuthError::configuration(format!("invalid RSA public key: {e}")))?;

        Ok(Self {
            jwk: Jwk {
                kty: "RSA".to_string(),
                kid: Some(kid.clone()),
                use_: Some("sig".to_string()),
                alg: Some("RS256".to_string()),
                n: Some(n),
                e: Some(e),
                crv: None,
                x: None,
                y: None,
            },
            kid,
            encoding_key,
            decoding_key,
        })
    }

    /// Loads the key described by the signing configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no key is configured or it cannot be parsed.
    pub fn from_config(config: &SigningConfig) -> AuthResult<Self> {
        let pem = config.pem()?;
        Self::from_pem(&pem, config.kid.clone())
    }

    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        self.jwk.clone()
    }
}

/// RFC 7638 JWK thumbprint of an RSA public key.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

// ============================================================================
// Key Set
// ============================================================================

struct KeyRing {
    active: Arc<SigningKey>,
    previous: Option<Arc<SigningKey>>,
}

/// Active signing key plus the key it replaced.
pub struct SigningKeySet {
    ring: ArcSwap<KeyRing>,
}

impl SigningKeySet {
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self {
            ring: ArcSwap::from_pointee(KeyRing {
                active: Arc::new(key),
                previous: None,
            }),
        }
    }

    /// Key used for new signatures.
    #[must_use]
    pub fn active(&self) -> Arc<SigningKey> {
        self.ring.load().active.clone()
    }

    /// Finds a verification key by `kid`; without one, the active key.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<Arc<SigningKey>> {
        let ring = self.ring.load();
        match kid {
            None => Some(ring.active.clone()),
            Some(kid) if ring.active.kid == kid => Some(ring.active.clone()),
            Some(kid) => ring
                .previous
                .as_ref()
                .filter(|k| k.kid == kid)
                .cloned(),
        }
    }

    /// Makes `key` active; the current key stays valid for verification.
    pub fn rotate(&self, key: SigningKey) {
        let key = Arc::new(key);
        self.ring.rcu(|ring| KeyRing {
            active: key.clone(),
            previous: Some(ring.active.clone()),
        });
        tracing::info!(kid = %key.kid, "signing key rotated");
    }

    /// Public keys for discovery.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let ring = self.ring.load();
        let mut keys = vec![ring.active.to_jwk()];
        keys.extend(ring.previous.as_ref().map(|k| k.to_jwk()));
        Jwks { keys }
    }
}

//! Signer capability.
//!
//! Token storage never touches key material directly: it asks a [`Signer`]
//! to turn claims into a compact JWT and back. [`JwtSigner`] is the bundled
//! RS256 implementation over a [`SigningKeySet`].

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};

use super::keys::{Jwks, SigningKeySet};
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::Claims;

/// Signs and verifies token claims.
pub trait Signer: Send + Sync {
    /// Produces a compact JWS for `claims`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if signing fails.
    fn sign(&self, claims: &Claims) -> AuthResult<String>;

    /// Verifies signature, issuer and expiry, and returns the claims.
    ///
    /// # Errors
    ///
    /// Returns `Expired` for an expired token and `InvalidToken` for any
    /// other failure.
    fn verify(&self, token: &str) -> AuthResult<Claims>;

    /// Public keys for discovery.
    fn jwks(&self) -> Jwks;
}

/// RS256 signer backed by the service key set.
pub struct JwtSigner {
    keys: Arc<SigningKeySet>,
    issuer: String,
    leeway_secs: u64,
}

impl JwtSigner {
    #[must_use]
    pub fn new(keys: Arc<SigningKeySet>, issuer: impl Into<String>, leeway_secs: u64) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            leeway_secs,
        }
    }
}

impl Signer for JwtSigner {
    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        let key = self.keys.active();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, key.encoding_key())
            .map_err(|e| AuthError::internal(format!("token signing failed: {e}")))
    }

    fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header = decode_header(token)
            .map_err(|e| AuthError::invalid_token(format!("malformed token: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::invalid_token("unexpected signing algorithm"));
        }
        let key = self
            .keys
            .find(header.kid.as_deref())
            .ok_or_else(|| AuthError::invalid_token("unknown signing key"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = self.leeway_secs;
        validation.validate_aud = false; // Audience validated at the resource server

        decode::<Claims>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }
}

pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::expired("token"),
        _ => AuthError::invalid_token(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::keys::SigningKey;
    use crate::types::TokenKind;

    const ISSUER: &str = "https://idp.example.com";

    fn signer() -> JwtSigner {
        let key = SigningKey::from_pem(include_str!("../../tests/fixtures/signing_key.pem"), None)
            .unwrap();
        JwtSigner::new(Arc::new(SigningKeySet::new(key)), ISSUER, 5)
    }

    fn claims(exp_offset: i64) -> Claims {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Claims {
            iss: ISSUER.to_string(),
            sub: Some("user-1".to_string()),
            aud: vec!["api".to_string()],
            exp: now + exp_offset,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
            scope: "openid scope1".to_string(),
            client_id: "c1".to_string(),
            token_use: TokenKind::Access,
            nonce: None,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let claims = claims(60);
        let token = signer.sign(&claims).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), claims);
    }

    #[test]
    fn test_expired_beyond_leeway() {
        let signer = signer();
        let token = signer.sign(&claims(-60)).unwrap();
        assert!(matches!(signer.verify(&token), Err(AuthError::Expired { .. })));
    }

    #[test]
    fn test_expiry_within_leeway_is_accepted() {
        let signer = signer();
        let token = signer.sign(&claims(-2)).unwrap();
        assert!(signer.verify(&token).is_ok());
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let signer = signer();
        let mut foreign = claims(60);
        foreign.iss = "https://elsewhere.example.com".to_string();
        let token = signer.sign(&foreign).unwrap();
        assert!(matches!(
            signer.verify(&token),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = signer();
        let token = signer.sign(&claims(60)).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let other = signer.sign(&claims(120)).unwrap();
        let other_payload = other.split('.').nth(1).unwrap().to_string();
        parts[1] = &other_payload;
        assert!(matches!(
            signer.verify(&parts.join(".")),
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            signer.verify("garbage"),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_previous_key_still_verifies() {
        let signer = signer();
        let token = signer.sign(&claims(60)).unwrap();
        signer.keys.rotate(
            SigningKey::from_pem(include_str!("../../tests/fixtures/partner_key.pem"), None)
                .unwrap(),
        );
        assert!(signer.verify(&token).is_ok());
        assert_eq!(signer.jwks().keys.len(), 2);
    }
}

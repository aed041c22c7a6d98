//! Token records and claims.
//!
//! Access, refresh and ID tokens share the [`Token`] record shape. Access
//! and ID token values are signed JWTs whose `jti` is the record id; refresh
//! token values are opaque and only their SHA-256 hash is stored.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::oauth::scope::join_scopes;

// =============================================================================
// Token Kind
// =============================================================================

/// Kind of token a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Id,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Id => "id",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = crate::AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            "id" => Ok(Self::Id),
            other => Err(crate::AuthError::internal(format!(
                "unknown token kind: {other}"
            ))),
        }
    }
}

// =============================================================================
// Token Record
// =============================================================================

/// Persisted token record.
///
/// Records are never rewritten in place beyond their revocation and link
/// columns: rotation revokes the old refresh record, points `replaced_by` at
/// its successor and inserts new records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Record id, used as the JWT `jti`.
    pub id: Uuid,
    pub kind: TokenKind,
    pub client_id: String,
    /// Empty for client-credentials grants.
    pub subject: Option<String>,
    pub scopes: Vec<String>,
    pub audience: Vec<String>,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// SHA-256 of the opaque value (refresh tokens only).
    pub token_hash: Option<String>,
    /// Paired refresh token (on access tokens).
    pub refresh_token_id: Option<Uuid>,
    /// Paired access token (on refresh tokens).
    pub access_token_id: Option<Uuid>,
    /// Successor of a rotated refresh token.
    pub replaced_by: Option<Uuid>,
    pub revoked_at: Option<OffsetDateTime>,
}

impl Token {
    /// Returns `true` if this token has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` if the token is past its expiry at `now`, allowing
    /// `leeway_secs` of clock skew.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime, leeway_secs: i64) -> bool {
        now.unix_timestamp() >= self.expires_at.unix_timestamp() + leeway_secs
    }

    /// Seconds from `issued_at` to `expires_at`.
    #[must_use]
    pub fn lifetime_secs(&self) -> i64 {
        self.expires_at.unix_timestamp() - self.issued_at.unix_timestamp()
    }

    /// Builds the claims carried by this token.
    #[must_use]
    pub fn claims(&self, issuer: &str) -> Claims {
        Claims {
            iss: issuer.to_string(),
            sub: self.subject.clone(),
            aud: self.audience.clone(),
            exp: self.expires_at.unix_timestamp(),
            iat: self.issued_at.unix_timestamp(),
            jti: self.id.to_string(),
            scope: join_scopes(&self.scopes),
            client_id: self.client_id.clone(),
            token_use: self.kind,
            nonce: None,
        }
    }
}

/// A freshly issued token: its record and the value handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub value: String,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims of a validated token; also the JWT payload for access and ID tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: String,
    pub client_id: String,
    pub token_use: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Claims {
    /// Granted scopes as a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        crate::oauth::scope::parse_scopes(&self.scope)
    }
}

// =============================================================================
// Opaque token helpers
// =============================================================================

/// Hashes an opaque token value with SHA-256 (hex).
#[must_use]
pub fn hash_token(value: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Generates a 256-bit random opaque token, base64url-encoded.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn token() -> Token {
        let issued_at = crate::now_seconds();
        Token {
            id: Uuid::new_v4(),
            kind: TokenKind::Access,
            client_id: "c1".to_string(),
            subject: None,
            scopes: vec!["scope1".to_string(), "scope2".to_string()],
            audience: vec!["https://api.example.com".to_string()],
            issued_at,
            expires_at: issued_at + Duration::from_secs(60),
            token_hash: None,
            refresh_token_id: None,
            access_token_id: None,
            replaced_by: None,
            revoked_at: None,
        }
    }

    #[test]
    fn test_expiry_with_leeway() {
        let t = token();
        let at_expiry = t.expires_at;
        assert!(t.is_expired_at(at_expiry, 0));
        assert!(!t.is_expired_at(at_expiry, 5));
        assert!(t.is_expired_at(at_expiry + Duration::from_secs(5), 5));
        assert_eq!(t.lifetime_secs(), 60);
    }

    #[test]
    fn test_claims_from_record() {
        let t = token();
        let claims = t.claims("https://idp.example.com");
        assert_eq!(claims.jti, t.id.to_string());
        assert_eq!(claims.scope, "scope1 scope2");
        assert_eq!(claims.scopes(), t.scopes);
        assert_eq!(claims.sub, None);
        assert_eq!(claims.token_use, TokenKind::Access);

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("sub").is_none());
        assert_eq!(json["token_use"], "access");
    }

    #[test]
    fn test_hash_token_is_stable() {
        let value = generate_token();
        assert_eq!(value.len(), 43);
        assert_eq!(hash_token(&value), hash_token(&value));
        assert_ne!(hash_token(&value), hash_token(&generate_token()));
        assert_eq!(hash_token(&value).len(), 64);
    }

    #[test]
    fn test_kind_round_trip_from_str() {
        for kind in [TokenKind::Access, TokenKind::Refresh, TokenKind::Id] {
            assert_eq!(kind.as_str().parse::<TokenKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<TokenKind>().is_err());
    }
}

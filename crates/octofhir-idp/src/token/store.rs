//! Token store.
//!
//! Issues access, refresh and ID tokens, validates presented values and
//! handles revocation. Access and ID tokens are signed JWTs whose `jti` is
//! the record id; refresh tokens are opaque and looked up by hash.
//!
//! Expiry is `issued_at + lifetime` in whole seconds. Clock skew leeway is
//! applied when validating, never when issuing.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::signer::Signer;
use crate::AuthResult;
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::oauth::scope::{excess, narrow_for_client};
use crate::storage::{Stores, TokenStorage};
use crate::types::token::{generate_token, hash_token};
use crate::types::{Claims, Client, IssuedToken, Token, TokenKind};

/// What an access token is issued for, with scopes already decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub client_id: String,
    pub subject: Option<String>,
    pub scopes: Vec<String>,
    pub audience: Vec<String>,
}

/// Result of a refresh: a new access token, and a new refresh token when
/// rotation is enabled.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access: IssuedToken,
    pub refresh: Option<IssuedToken>,
}

#[derive(Debug, Clone)]
struct Lifetimes {
    access: Duration,
    refresh: Duration,
    id: Duration,
}

#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<dyn TokenStorage>,
    signer: Arc<dyn Signer>,
    issuer: String,
    lifetimes: Lifetimes,
    leeway_secs: i64,
    rotation: bool,
}

impl TokenStore {
    #[must_use]
    pub fn new(
        stores: &Stores,
        signer: Arc<dyn Signer>,
        issuer: impl Into<String>,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            tokens: stores.tokens.clone(),
            signer,
            issuer: issuer.into(),
            lifetimes: Lifetimes {
                access: config.access_token_lifetime,
                refresh: config.refresh_token_lifetime,
                id: config.id_token_lifetime,
            },
            leeway_secs: i64::try_from(config.clock_skew.as_secs()).unwrap_or(i64::MAX),
            rotation: config.refresh_token_rotation,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Issues an access token to `client`.
    ///
    /// Granted scopes are `requested` narrowed to the client's allowed set;
    /// trusted clients get `requested` unchanged.
    ///
    /// # Errors
    ///
    /// Returns a signing or storage error.
    pub async fn issue_access_token(
        &self,
        client: &Client,
        subject: Option<&str>,
        requested: &[String],
        audience: Vec<String>,
    ) -> AuthResult<IssuedToken> {
        let scopes = narrow_for_client(client, requested, subject.is_some());
        self.mint_access_token(TokenGrant {
            client_id: client.id.clone(),
            subject: subject.map(str::to_string),
            scopes,
            audience,
        })
        .await
    }

    /// Issues an access token for an already decided grant.
    ///
    /// # Errors
    ///
    /// Returns a signing or storage error.
    pub async fn mint_access_token(&self, grant: TokenGrant) -> AuthResult<IssuedToken> {
        let issued = self.build_signed(TokenKind::Access, grant, None)?;
        self.tokens.insert_token(&issued.token).await?;
        tracing::info!(
            token_id = %issued.token.id,
            client_id = %issued.token.client_id,
            "access token issued"
        );
        Ok(issued)
    }

    /// Issues a refresh token paired with `access`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `access` was never stored.
    pub async fn issue_refresh_token(&self, access: &Token) -> AuthResult<IssuedToken> {
        let issued = self.build_refresh(access);
        self.tokens
            .attach_refresh_token(access.id, &issued.token)
            .await?;
        tracing::info!(
            token_id = %issued.token.id,
            client_id = %issued.token.client_id,
            "refresh token issued"
        );
        Ok(issued)
    }

    /// Issues an OpenID Connect ID token for `subject`, addressed to the
    /// client.
    ///
    /// # Errors
    ///
    /// Returns a signing or storage error.
    pub async fn issue_id_token(
        &self,
        client_id: &str,
        subject: &str,
        nonce: Option<String>,
    ) -> AuthResult<IssuedToken> {
        let grant = TokenGrant {
            client_id: client_id.to_string(),
            subject: Some(subject.to_string()),
            scopes: vec!["openid".to_string()],
            audience: vec![client_id.to_string()],
        };
        let issued = self.build_signed(TokenKind::Id, grant, nonce)?;
        self.tokens.insert_token(&issued.token).await?;
        tracing::debug!(token_id = %issued.token.id, client_id, "id token issued");
        Ok(issued)
    }

    /// Exchanges a refresh token for new tokens.
    ///
    /// With rotation, the presented token is revoked (pointing at its
    /// successor) and a new pair is issued; a rotated token can never be
    /// used again. `requested` may only narrow the original scopes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for an unknown, foreign, expired, revoked or
    /// already rotated token, and `InvalidScope` for scopes outside the
    /// original grant.
    pub async fn refresh(
        &self,
        client_id: &str,
        value: &str,
        requested: &[String],
    ) -> AuthResult<RefreshedTokens> {
        let now = crate::now_seconds();
        let old = self
            .tokens
            .find_token_by_hash(&hash_token(value))
            .await?
            .filter(|t| t.kind == TokenKind::Refresh)
            .ok_or_else(|| AuthError::invalid_grant("unknown refresh token"))?;

        if old.client_id != client_id {
            tracing::warn!(token_id = %old.id, client_id, "refresh token presented by another client");
            return Err(AuthError::invalid_grant("refresh token was issued to another client"));
        }
        if old.is_revoked() {
            tracing::warn!(
                token_id = %old.id,
                client_id,
                rotated = old.replaced_by.is_some(),
                "revoked refresh token presented"
            );
            return Err(AuthError::invalid_grant("refresh token revoked"));
        }
        if old.is_expired_at(now, self.leeway_secs) {
            return Err(AuthError::invalid_grant("refresh token expired"));
        }

        let scopes = if requested.is_empty() {
            old.scopes.clone()
        } else {
            let extra = excess(requested, &old.scopes);
            if !extra.is_empty() {
                return Err(AuthError::invalid_scope(format!(
                    "scopes not in original grant: {}",
                    extra.join(" ")
                )));
            }
            requested.to_vec()
        };

        let grant = TokenGrant {
            client_id: old.client_id.clone(),
            subject: old.subject.clone(),
            scopes,
            audience: old.audience.clone(),
        };
        let mut access = self.build_signed(TokenKind::Access, grant, None)?;

        if !self.rotation {
            self.tokens.insert_token(&access.token).await?;
            tracing::info!(token_id = %access.token.id, client_id, "access token refreshed");
            return Ok(RefreshedTokens {
                access,
                refresh: None,
            });
        }

        let refresh = self.build_refresh(&access.token);
        access.token.refresh_token_id = Some(refresh.token.id);
        match self
            .tokens
            .rotate_refresh_token(old.id, &access.token, &refresh.token, now)
            .await
        {
            Ok(()) => {}
            Err(AuthError::TokenRevoked) => {
                tracing::warn!(token_id = %old.id, client_id, "concurrent refresh token rotation lost");
                return Err(AuthError::invalid_grant("refresh token already used"));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            token_id = %refresh.token.id,
            replaces = %old.id,
            client_id,
            "refresh token rotated"
        );
        Ok(RefreshedTokens {
            access,
            refresh: Some(refresh),
        })
    }

    /// Validates a presented token value and returns its claims.
    ///
    /// JWT values are verified by the signer and then checked against their
    /// record; opaque values are looked up by hash.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `TokenRevoked`, `Expired` or `InvalidToken`.
    pub async fn validate(&self, value: &str) -> AuthResult<Claims> {
        let now = crate::now_seconds();

        let (record, claims) = if looks_like_jwt(value) {
            let claims = self.signer.verify(value)?;
            let id = Uuid::parse_str(&claims.jti)
                .map_err(|_| AuthError::invalid_token("jti is not a token id"))?;
            let record = self
                .tokens
                .find_token(id)
                .await?
                .ok_or_else(|| AuthError::not_found("token", id.to_string()))?;
            if record.kind != claims.token_use || record.client_id != claims.client_id {
                return Err(AuthError::invalid_token("token does not match its record"));
            }
            (record, claims)
        } else {
            let record = self
                .tokens
                .find_token_by_hash(&hash_token(value))
                .await?
                .ok_or_else(|| AuthError::not_found("token", "<opaque>"))?;
            let claims = record.claims(&self.issuer);
            (record, claims)
        };

        if record.is_revoked() {
            tracing::debug!(token_id = %record.id, "revoked token presented");
            return Err(AuthError::TokenRevoked);
        }
        if record.is_expired_at(now, self.leeway_secs) {
            return Err(AuthError::expired("token"));
        }
        Ok(claims)
    }

    /// Validates a value presented as a bearer credential. Only access
    /// tokens qualify.
    ///
    /// # Errors
    ///
    /// As [`TokenStore::validate`], plus `InvalidToken` for refresh and ID
    /// tokens.
    pub async fn validate_access(&self, value: &str) -> AuthResult<Claims> {
        let claims = self.validate(value).await?;
        if claims.token_use != TokenKind::Access {
            tracing::debug!(
                token_id = %claims.jti,
                token_use = claims.token_use.as_str(),
                "non-access token presented as bearer"
            );
            return Err(AuthError::invalid_token("not an access token"));
        }
        Ok(claims)
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find(&self, id: Uuid) -> AuthResult<Option<Token>> {
        self.tokens.find_token(id).await
    }

    /// Revokes a token and its linked pair. Unknown ids and repeated
    /// revocations succeed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn revoke(&self, id: Uuid) -> AuthResult<()> {
        if self.tokens.revoke_token(id, crate::now_seconds()).await? {
            tracing::info!(token_id = %id, "token revoked");
        } else {
            tracing::debug!(token_id = %id, "revocation of unknown token");
        }
        Ok(())
    }

    /// Revokes by presented value: an access or ID JWT by its `jti`, a
    /// refresh token by hash. Values that resolve to nothing succeed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn revoke_value(&self, value: &str) -> AuthResult<()> {
        let id = if looks_like_jwt(value) {
            match self.signer.verify(value) {
                Ok(claims) => Uuid::parse_str(&claims.jti).ok(),
                Err(e) => {
                    tracing::debug!(error = %e, "revocation of unverifiable token");
                    None
                }
            }
        } else {
            self.tokens
                .find_token_by_hash(&hash_token(value))
                .await?
                .map(|t| t.id)
        };

        match id {
            Some(id) => self.revoke(id).await,
            None => Ok(()),
        }
    }

    /// Deletes tokens whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        self.tokens
            .delete_expired_tokens(crate::now_seconds())
            .await
    }

    fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.lifetimes.access,
            TokenKind::Refresh => self.lifetimes.refresh,
            TokenKind::Id => self.lifetimes.id,
        }
    }

    fn record(&self, kind: TokenKind, grant: TokenGrant, issued_at: OffsetDateTime) -> Token {
        let audience = if grant.audience.is_empty() {
            vec![self.issuer.clone()]
        } else {
            grant.audience
        };
        Token {
            id: Uuid::new_v4(),
            kind,
            client_id: grant.client_id,
            subject: grant.subject,
            scopes: grant.scopes,
            audience,
            issued_at,
            expires_at: issued_at + self.lifetime(kind),
            token_hash: None,
            refresh_token_id: None,
            access_token_id: None,
            replaced_by: None,
            revoked_at: None,
        }
    }

    fn build_signed(
        &self,
        kind: TokenKind,
        grant: TokenGrant,
        nonce: Option<String>,
    ) -> AuthResult<IssuedToken> {
        let token = self.record(kind, grant, crate::now_seconds());
        let claims = Claims {
            nonce,
            ..token.claims(&self.issuer)
        };
        let value = self.signer.sign(&claims)?;
        Ok(IssuedToken { token, value })
    }

    fn build_refresh(&self, access: &Token) -> IssuedToken {
        let value = generate_token();
        let grant = TokenGrant {
            client_id: access.client_id.clone(),
            subject: access.subject.clone(),
            scopes: access.scopes.clone(),
            audience: access.audience.clone(),
        };
        let mut token = self.record(TokenKind::Refresh, grant, access.issued_at);
        token.token_hash = Some(hash_token(&value));
        token.access_token_id = Some(access.id);
        IssuedToken { token, value }
    }
}

fn looks_like_jwt(value: &str) -> bool {
    value.split('.').count() == 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::token::{JwtSigner, SigningKey, SigningKeySet};
    use crate::types::ClientOptions;

    const ISSUER: &str = "https://idp.example.com";

    fn store_with(config: OAuthConfig) -> TokenStore {
        let key = SigningKey::from_pem(include_str!("../../tests/fixtures/signing_key.pem"), None)
            .unwrap();
        let signer = JwtSigner::new(Arc::new(SigningKeySet::new(key)), ISSUER, 5);
        let stores = Stores::from_backend(MemoryStorage::new());
        TokenStore::new(&stores, Arc::new(signer), ISSUER, &config)
    }

    fn store() -> TokenStore {
        store_with(OAuthConfig::default())
    }

    fn scopes(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn client(allowed: &str, trusted: bool) -> Client {
        Client::from_options(
            "c1".to_string(),
            ClientOptions {
                scopes: scopes(allowed),
                trusted,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_issue_then_validate_round_trip() {
        let store = store();
        let issued = store
            .issue_access_token(
                &client("read write", false),
                Some("user-1"),
                &scopes("read admin"),
                vec!["https://api.example.com".to_string()],
            )
            .await
            .unwrap();

        let claims = store.validate(&issued.value).await.unwrap();
        assert_eq!(claims.scopes(), vec!["read"]);
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.aud, vec!["https://api.example.com"]);
        assert_eq!(claims.jti, issued.token.id.to_string());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn test_trusted_client_keeps_requested_scopes() {
        let store = store();
        let issued = store
            .issue_access_token(&client("read", true), None, &scopes("read admin"), vec![])
            .await
            .unwrap();
        assert_eq!(issued.token.scopes, scopes("read admin"));
        assert_eq!(issued.token.audience, vec![ISSUER]);
    }

    #[tokio::test]
    async fn test_revoke_cascades_and_is_idempotent() {
        let store = store();
        let access = store
            .issue_access_token(&client("read", false), Some("u"), &scopes("read"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();

        store.revoke(access.token.id).await.unwrap();
        store.revoke(access.token.id).await.unwrap();
        store.revoke(Uuid::new_v4()).await.unwrap();

        assert!(matches!(
            store.validate(&access.value).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            store.validate(&refresh.value).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates() {
        let store = store();
        let access = store
            .issue_access_token(&client("read write", false), Some("u"), &scopes("read write"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();

        let refreshed = store.refresh("c1", &refresh.value, &scopes("read")).await.unwrap();
        let new_refresh = refreshed.refresh.unwrap();
        assert_eq!(refreshed.access.token.scopes, vec!["read"]);
        assert_eq!(
            refreshed.access.token.refresh_token_id,
            Some(new_refresh.token.id)
        );

        assert!(matches!(
            store.refresh("c1", &refresh.value, &[]).await,
            Err(AuthError::InvalidGrant { .. })
        ));
        let old = store.find(refresh.token.id).await.unwrap().unwrap();
        assert_eq!(old.replaced_by, Some(new_refresh.token.id));

        assert!(store.validate(&refreshed.access.value).await.is_ok());
        assert!(store.refresh("c1", &new_refresh.value, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_wider_scopes_and_other_clients() {
        let store = store();
        let access = store
            .issue_access_token(&client("read write", false), None, &scopes("read"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();

        assert!(matches!(
            store.refresh("c1", &refresh.value, &scopes("read write")).await,
            Err(AuthError::InvalidScope { .. })
        ));
        assert!(matches!(
            store.refresh("c2", &refresh.value, &[]).await,
            Err(AuthError::InvalidGrant { .. })
        ));
        assert!(matches!(
            store.refresh("c1", "unknown", &[]).await,
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_token() {
        let store = store_with(OAuthConfig {
            refresh_token_rotation: false,
            ..Default::default()
        });
        let access = store
            .issue_access_token(&client("read", false), None, &scopes("read"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();

        let first = store.refresh("c1", &refresh.value, &[]).await.unwrap();
        assert!(first.refresh.is_none());
        assert!(store.refresh("c1", &refresh.value, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_id_token_carries_nonce() {
        let store = store();
        let issued = store
            .issue_id_token("c1", "user-1", Some("n-0S6_WzA2Mj".to_string()))
            .await
            .unwrap();
        let claims = store.validate(&issued.value).await.unwrap();
        assert_eq!(claims.token_use, TokenKind::Id);
        assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(claims.aud, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_validate_access_accepts_only_access_tokens() {
        let store = store();
        let access = store
            .issue_access_token(&client("openid", false), Some("u"), &scopes("openid"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();
        let id_token = store.issue_id_token("c1", "u", None).await.unwrap();

        assert!(store.validate_access(&access.value).await.is_ok());
        assert!(matches!(
            store.validate_access(&refresh.value).await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            store.validate_access(&id_token.value).await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_unknown_values() {
        let store = store();
        assert!(matches!(
            store.validate("opaque-unknown").await,
            Err(AuthError::NotFound { .. })
        ));
        assert!(matches!(
            store.validate("a.b.c").await,
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoke_value() {
        let store = store();
        let access = store
            .issue_access_token(&client("read", false), None, &scopes("read"), vec![])
            .await
            .unwrap();
        let refresh = store.issue_refresh_token(&access.token).await.unwrap();

        store.revoke_value(&refresh.value).await.unwrap();
        store.revoke_value("never-issued").await.unwrap();
        assert!(matches!(
            store.validate(&access.value).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let store = store_with(OAuthConfig {
            access_token_lifetime: Duration::from_secs(1),
            clock_skew: Duration::ZERO,
            ..Default::default()
        });
        let access = store
            .issue_access_token(&client("read", false), None, &scopes("read"), vec![])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(matches!(
            store.validate(&access.value).await,
            Err(AuthError::Expired { .. })
        ));
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
    }
}

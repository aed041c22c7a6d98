//! Authorization request types.
//!
//! An authorization request moves through `pending -> authenticated ->
//! consumed`, or ends `expired` once its lifetime has passed. The request id
//! doubles as the authorization code handed to the client, so it never
//! leaves this server before authentication completes: delegated login
//! identifies the request upstream by a separate random state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod};

/// In-flight authorization-code request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Request id, also used as the authorization code.
    pub id: Uuid,

    /// Client that started the flow.
    pub client_id: String,

    /// Local subject, set once authentication completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Opaque client state echoed back on redirect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// OpenID Connect nonce bound into the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Redirect URI, registered for the client.
    pub redirect_uri: String,

    /// PKCE code challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE challenge method; `None` with a challenge means `plain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<PkceChallengeMethod>,

    /// `true` once the subject has authenticated.
    pub done: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Set when the request is exchanged for tokens.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_at: Option<OffsetDateTime>,

    /// Hash of the `state` sent to the upstream provider.
    #[serde(default, skip_serializing)]
    pub upstream_state_hash: Option<String>,
}

/// Lifecycle state of an [`AuthRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRequestState {
    Pending,
    Authenticated,
    Consumed,
    Expired,
}

impl AuthRequestState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for AuthRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for starting an authorization-code flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewAuthRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<PkceChallengeMethod>,
}

impl AuthRequest {
    /// Builds a pending request that expires `ttl` after creation.
    #[must_use]
    pub fn new(params: NewAuthRequest, ttl: Duration) -> Self {
        let created_at = crate::now_seconds();
        Self {
            id: Uuid::new_v4(),
            client_id: params.client_id,
            subject: None,
            scopes: params.scopes,
            state: params.state,
            nonce: params.nonce,
            redirect_uri: params.redirect_uri,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            done: false,
            created_at,
            expires_at: created_at + ttl,
            consumed_at: None,
            upstream_state_hash: None,
        }
    }

    /// Returns `true` if the request's lifetime has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.expires_at.unix_timestamp()
    }

    /// Returns the lifecycle state at `now`.
    #[must_use]
    pub fn state_at(&self, now: OffsetDateTime) -> AuthRequestState {
        if self.consumed_at.is_some() {
            AuthRequestState::Consumed
        } else if self.is_expired_at(now) {
            AuthRequestState::Expired
        } else if self.done {
            AuthRequestState::Authenticated
        } else {
            AuthRequestState::Pending
        }
    }

    /// Checks whether this request may be exchanged at `now`.
    ///
    /// Checks run in order: expiry, prior consumption, authentication, PKCE.
    /// An expired request reports `Expired` even if it was already consumed.
    ///
    /// # Errors
    ///
    /// Returns `Expired`, `Replay`, `Conflict` (not yet authenticated) or
    /// `PkceVerificationFailed`.
    pub fn check_exchange(
        &self,
        now: OffsetDateTime,
        code_verifier: Option<&str>,
    ) -> AuthResult<()> {
        if self.is_expired_at(now) {
            return Err(AuthError::expired("authorization request"));
        }
        if self.consumed_at.is_some() {
            return Err(AuthError::replay(self.id.to_string()));
        }
        if !self.done {
            return Err(AuthError::conflict(format!(
                "authorization request {} is not authenticated",
                self.id
            )));
        }

        if let Some(challenge) = &self.code_challenge {
            let verifier = code_verifier.ok_or(AuthError::PkceVerificationFailed)?;
            let method = self
                .code_challenge_method
                .unwrap_or(PkceChallengeMethod::Plain);
            PkceChallenge::new(challenge.clone(), method)
                .verify(verifier)
                .map_err(|_| AuthError::PkceVerificationFailed)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::pkce::PkceVerifier;

    fn request(challenge: Option<(&str, PkceChallengeMethod)>) -> AuthRequest {
        let mut req = AuthRequest::new(
            NewAuthRequest {
                client_id: "c1".to_string(),
                redirect_uri: "https://app.example.com/cb".to_string(),
                scopes: vec!["openid".to_string()],
                code_challenge: challenge.map(|(c, _)| c.to_string()),
                code_challenge_method: challenge.map(|(_, m)| m),
                ..Default::default()
            },
            Duration::from_secs(600),
        );
        req.done = true;
        req.subject = Some("user-1".to_string());
        req
    }

    #[test]
    fn test_expiry_is_second_granular() {
        let req = request(None);
        assert!(!req.is_expired_at(req.created_at + Duration::from_secs(599)));
        assert!(req.is_expired_at(req.created_at + Duration::from_secs(600)));
    }

    #[test]
    fn test_state_transitions() {
        let mut req = request(None);
        let now = req.created_at;
        req.done = false;
        assert_eq!(req.state_at(now), AuthRequestState::Pending);
        req.done = true;
        assert_eq!(req.state_at(now), AuthRequestState::Authenticated);
        assert_eq!(
            req.state_at(now + Duration::from_secs(601)),
            AuthRequestState::Expired
        );
        req.consumed_at = Some(now);
        assert_eq!(req.state_at(now), AuthRequestState::Consumed);
    }

    #[test]
    fn test_check_exchange_pkce_s256() {
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        let req = request(Some((challenge.as_str(), PkceChallengeMethod::S256)));
        let now = req.created_at;

        assert!(matches!(
            req.check_exchange(now, None),
            Err(AuthError::PkceVerificationFailed)
        ));
        assert!(matches!(
            req.check_exchange(now, Some(PkceVerifier::generate().as_str())),
            Err(AuthError::PkceVerificationFailed)
        ));
        assert!(req.check_exchange(now, Some(verifier.as_str())).is_ok());
    }

    #[test]
    fn test_check_exchange_order() {
        let mut req = request(None);
        let created = req.created_at;
        req.consumed_at = Some(created);

        assert!(matches!(
            req.check_exchange(created, None),
            Err(AuthError::Replay { .. })
        ));
        assert!(matches!(
            req.check_exchange(created + Duration::from_secs(3600), None),
            Err(AuthError::Expired { .. })
        ));

        let mut pending = request(None);
        pending.done = false;
        assert!(matches!(
            pending.check_exchange(created, None),
            Err(AuthError::Conflict { .. })
        ));
    }

    #[test]
    fn test_upstream_state_hash_not_serialized() {
        let mut req = request(None);
        req.upstream_state_hash = Some("3f1a".to_string());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("upstreamStateHash").is_none());
        assert_eq!(json["redirectUri"], "https://app.example.com/cb");
    }

    #[test]
    fn test_verifier_ignored_without_challenge() {
        let req = request(None);
        assert!(req.check_exchange(req.created_at, Some("anything")).is_ok());
    }
}

//! Authorization request store.
//!
//! Requests are created when an authorization flow starts, bound to a
//! subject once the user authenticates, and consumed exactly once when the
//! code (the request id) is exchanged. Consumption is an atomic
//! check-and-set in the backend: the exchange checks run inside it, so of N
//! concurrent exchanges of one code exactly one succeeds and the rest fail
//! with `Replay`. A failed check (wrong verifier, wrong client) does not
//! burn the code.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{AuthRequestStorage, ClientStorage, ConsumeGuard, Stores};
use crate::types::token::{generate_token, hash_token};
use crate::types::{AuthRequest, NewAuthRequest};

#[derive(Clone)]
pub struct AuthRequestStore {
    clients: Arc<dyn ClientStorage>,
    requests: Arc<dyn AuthRequestStorage>,
    ttl: Duration,
}

impl AuthRequestStore {
    #[must_use]
    pub fn new(stores: &Stores, ttl: Duration) -> Self {
        Self {
            clients: stores.clients.clone(),
            requests: stores.auth_requests.clone(),
            ttl,
        }
    }

    /// Starts a flow.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the client is unknown or the redirect URI
    /// is not registered for it.
    pub async fn create(&self, params: NewAuthRequest) -> AuthResult<AuthRequest> {
        let client = self
            .clients
            .find_client(&params.client_id)
            .await?
            .ok_or_else(|| {
                AuthError::invalid_request(format!("unknown client: {}", params.client_id))
            })?;

        if !client.is_redirect_uri_allowed(&params.redirect_uri) {
            tracing::warn!(
                client_id = %client.id,
                redirect_uri = %params.redirect_uri,
                "redirect URI not registered"
            );
            return Err(AuthError::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }

        let request = AuthRequest::new(params, self.ttl);
        self.requests.create_auth_request(&request).await?;
        tracing::info!(
            auth_request_id = %request.id,
            client_id = %request.client_id,
            "authorization request created"
        );
        Ok(request)
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find(&self, id: Uuid) -> AuthResult<Option<AuthRequest>> {
        self.requests.find_auth_request(id).await
    }

    /// Issues a fresh random state identifying a pending request to an
    /// upstream provider. Only its hash is stored; a new state replaces the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Conflict` if the request is no longer pending.
    pub async fn issue_upstream_state(&self, id: Uuid) -> AuthResult<String> {
        let state = generate_token();
        self.requests
            .set_upstream_state(id, &hash_token(&state))
            .await?;
        tracing::debug!(auth_request_id = %id, "upstream state issued");
        Ok(state)
    }

    /// Resolves a state returned by an upstream provider to its request.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_by_upstream_state(&self, state: &str) -> AuthResult<Option<AuthRequest>> {
        self.requests
            .find_auth_request_by_upstream_state(&hash_token(state))
            .await
    }

    /// Binds the authenticated subject to a pending request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired`, or `Conflict` if already consumed.
    pub async fn authenticate(&self, id: Uuid, subject: &str) -> AuthResult<AuthRequest> {
        let existing = self
            .requests
            .find_auth_request(id)
            .await?
            .ok_or_else(|| AuthError::not_found("auth request", id.to_string()))?;
        if existing.is_expired_at(crate::now_seconds()) {
            return Err(AuthError::expired("authorization request"));
        }

        let request = self.requests.authenticate_auth_request(id, subject).await?;
        tracing::info!(auth_request_id = %id, "authorization request authenticated");
        Ok(request)
    }

    /// Consumes a request, verifying PKCE when a challenge was recorded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired`, `Replay`, `Conflict` (not yet
    /// authenticated) or `PkceVerificationFailed`.
    pub async fn exchange(&self, id: Uuid, code_verifier: Option<&str>) -> AuthResult<AuthRequest> {
        let now = crate::now_seconds();
        let guard = |request: &AuthRequest| request.check_exchange(now, code_verifier);
        self.consume(id, now, &guard).await
    }

    /// Consumes a request on behalf of the token endpoint, additionally
    /// requiring the presenting client and redirect URI to match.
    ///
    /// # Errors
    ///
    /// As [`exchange`](Self::exchange), plus `InvalidGrant` on a client
    /// mismatch or a missing or mismatched redirect URI.
    pub async fn exchange_for_client(
        &self,
        id: Uuid,
        client_id: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> AuthResult<AuthRequest> {
        let now = crate::now_seconds();
        let guard = |request: &AuthRequest| {
            if request.client_id != client_id {
                return Err(AuthError::invalid_grant(
                    "authorization code was issued to another client",
                ));
            }
            match redirect_uri {
                Some(uri) if uri == request.redirect_uri => {}
                Some(_) => return Err(AuthError::invalid_grant("redirect_uri mismatch")),
                None => return Err(AuthError::invalid_grant("redirect_uri is required")),
            }
            request.check_exchange(now, code_verifier)
        };
        self.consume(id, now, &guard).await
    }

    async fn consume(
        &self,
        id: Uuid,
        now: time::OffsetDateTime,
        guard: ConsumeGuard<'_>,
    ) -> AuthResult<AuthRequest> {
        match self.requests.consume_auth_request(id, now, guard).await {
            Ok(request) => {
                tracing::info!(auth_request_id = %id, client_id = %request.client_id, "authorization code exchanged");
                Ok(request)
            }
            Err(e) => {
                tracing::warn!(auth_request_id = %id, error = %e, "authorization code exchange rejected");
                Err(e)
            }
        }
    }

    /// Removes requests past their lifetime.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        self.requests
            .delete_expired_auth_requests(crate::now_seconds())
            .await
    }
}

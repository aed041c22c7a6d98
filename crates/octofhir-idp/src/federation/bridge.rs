//! Delegated login bridge.
//!
//! Drives an authorization request through an upstream provider:
//!
//! ```text
//! redirect-to-upstream -> callback-received -> token-exchanged
//!                                           \-> error
//! ```
//!
//! Each start issues a fresh random `state` for the upstream provider; only
//! its hash is kept on the auth request, and the request id (the local
//! authorization code) never goes upstream. A callback carrying an
//! `error` parameter ends the flow with `AccessDenied`. A callback carrying
//! a code is exchanged upstream (retried only for transient failures, each
//! attempt bounded by the request timeout); the upstream subject is upserted
//! as a local user and bound to the auth request.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use super::error::FederationError;
use super::upstream::{UpstreamClient, UpstreamIdentity};
use crate::AuthResult;
use crate::config::DelegatedConfig;
use crate::error::AuthError;
use crate::oauth::AuthRequestStore;
use crate::storage::{Stores, UserStorage};
use crate::types::AuthRequest;

/// Query parameters of the upstream redirect back to this server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Retry policy for upstream calls.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

pub struct DelegatedBridge {
    upstream: Arc<dyn UpstreamClient>,
    auth_requests: AuthRequestStore,
    users: Arc<dyn UserStorage>,
    policy: RetryPolicy,
}

impl DelegatedBridge {
    #[must_use]
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        auth_requests: AuthRequestStore,
        stores: &Stores,
        config: &DelegatedConfig,
    ) -> Self {
        Self {
            upstream,
            auth_requests,
            users: stores.users.clone(),
            policy: RetryPolicy {
                timeout: config.request_timeout,
                max_attempts: config.max_attempts.max(1),
                backoff: config.retry_backoff,
            },
        }
    }

    /// Returns the upstream URL to redirect the user agent to for a pending
    /// auth request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired`, `Conflict` if the request is no longer
    /// pending, or a federation error if discovery fails.
    pub async fn start(&self, auth_request_id: Uuid) -> AuthResult<Url> {
        let request = self
            .auth_requests
            .find(auth_request_id)
            .await?
            .ok_or_else(|| AuthError::not_found("auth request", auth_request_id.to_string()))?;
        if request.is_expired_at(crate::now_seconds()) {
            return Err(AuthError::expired("authorization request"));
        }
        if request.done {
            return Err(AuthError::conflict(format!(
                "authorization request {auth_request_id} is already authenticated"
            )));
        }

        let state = self
            .auth_requests
            .issue_upstream_state(auth_request_id)
            .await?;
        let url = self
            .bounded(self.upstream.authorization_url(&state))
            .await
            .map_err(AuthError::from)?;
        tracing::info!(auth_request_id = %auth_request_id, "redirecting to upstream");
        Ok(url)
    }

    /// Completes delegated login from the upstream callback.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` for an upstream `error` or a rejected code,
    /// `TemporarilyUnavailable` when transient failures outlast the retry
    /// budget, `InvalidRequest` for a callback without code or with a state
    /// that matches no started login, and auth request errors from binding
    /// the subject.
    pub async fn callback(&self, params: CallbackParams) -> AuthResult<AuthRequest> {
        if let Some(error) = params.error {
            tracing::warn!(
                error = %error,
                description = params.error_description.as_deref(),
                "upstream returned an error to the callback"
            );
            return Err(FederationError::Denied {
                error,
                description: params.error_description,
            }
            .into());
        }

        let state = params
            .state
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("callback without state"))?;
        let request = self
            .auth_requests
            .find_by_upstream_state(state)
            .await?
            .ok_or_else(|| AuthError::invalid_request("callback state matches no pending login"))?;
        let auth_request_id = request.id;
        if request.done {
            return Err(AuthError::conflict(format!(
                "authorization request {auth_request_id} is already authenticated"
            )));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("callback without code"))?;
        tracing::debug!(auth_request_id = %auth_request_id, "upstream callback received");

        let identity = self.exchange(auth_request_id, code).await?;
        let user = self
            .users
            .upsert_user(&identity.subject, identity.email.as_deref())
            .await?;
        let request = self.auth_requests.authenticate(auth_request_id, &user.id).await?;

        tracing::info!(
            auth_request_id = %auth_request_id,
            user_id = %user.id,
            "delegated login completed"
        );
        Ok(request)
    }

    async fn exchange(&self, auth_request_id: Uuid, code: &str) -> AuthResult<UpstreamIdentity> {
        let mut attempt = 1;
        loop {
            match self.bounded(self.upstream.exchange_code(code)).await {
                Ok(identity) => return Ok(identity),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        auth_request_id = %auth_request_id,
                        attempt,
                        error = %e,
                        retry_in = ?delay,
                        "upstream code exchange failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        auth_request_id = %auth_request_id,
                        attempt,
                        error = %e,
                        "upstream code exchange failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, FederationError>>,
    ) -> Result<T, FederationError> {
        tokio::time::timeout(self.policy.timeout, call)
            .await
            .unwrap_or(Err(FederationError::Timeout(self.policy.timeout)))
    }
}

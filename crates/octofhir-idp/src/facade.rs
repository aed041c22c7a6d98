//! Provider-facing storage facade.
//!
//! An OpenID provider runtime reaches client records, authorization
//! requests, tokens and signing keys only through [`OidcStorage`].
//! [`StorageFacade`] is its one implementation and also carries the
//! administrative operations (client and secret management, users) that
//! sit outside the provider contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::AuthResult;
use crate::context::IdpContext;
use crate::error::AuthError;
use crate::federation::{CallbackParams, DelegatedBridge};
use crate::grants::{TokenRequest, TokenResponse};
use crate::storage::{self, Page};
use crate::token::{Jwks, SigningKey};
use crate::types::{
    AuthRequest, Claims, Client, ClientOptions, ClientPatch, CreatedSecret, IssuedToken,
    NewAuthRequest, User,
};

/// Rows removed by [`OidcStorage::cleanup_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub auth_requests: u64,
    pub tokens: u64,
}

/// Storage capability required by the provider runtime.
#[async_trait]
pub trait OidcStorage: Send + Sync {
    /// Client by id. Secrets are summarized, never hashed values.
    async fn get_client(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Returns `true` if `secret` matches one of the client's secrets.
    async fn verify_client_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool>;

    async fn create_auth_request(&self, request: NewAuthRequest) -> AuthResult<AuthRequest>;

    async fn auth_request_by_id(&self, id: Uuid) -> AuthResult<Option<AuthRequest>>;

    /// Binds the authenticated subject to a pending request.
    async fn authenticate_auth_request(&self, id: Uuid, subject: &str) -> AuthResult<AuthRequest>;

    /// Consumes an authenticated request exactly once.
    async fn exchange_auth_request(
        &self,
        id: Uuid,
        code_verifier: Option<&str>,
    ) -> AuthResult<AuthRequest>;

    /// Issues an access token, narrowing `scopes` to the client's allowed set.
    async fn issue_access_token(
        &self,
        client_id: &str,
        subject: Option<&str>,
        scopes: &[String],
        audience: Vec<String>,
    ) -> AuthResult<IssuedToken>;

    /// Issues a refresh token paired with an access token.
    async fn issue_refresh_token(&self, access_token_id: Uuid) -> AuthResult<IssuedToken>;

    /// Claims of a live token; fails for expired, revoked or unknown tokens.
    async fn validate_token(&self, value: &str) -> AuthResult<Claims>;

    /// Like [`OidcStorage::validate_token`], but only access tokens pass.
    async fn validate_access_token(&self, value: &str) -> AuthResult<Claims>;

    async fn revoke_token(&self, id: Uuid) -> AuthResult<()>;

    async fn revoke_token_value(&self, value: &str) -> AuthResult<()>;

    /// Runs the token endpoint for a form-decoded request and its
    /// `Authorization` header.
    async fn token_request(
        &self,
        request: &TokenRequest,
        authorization: Option<&str>,
    ) -> AuthResult<TokenResponse>;

    /// The key the provider signs with.
    fn signing_key(&self) -> Arc<SigningKey>;

    /// Public keys for discovery.
    fn jwks(&self) -> Jwks;

    async fn cleanup_expired(&self) -> AuthResult<CleanupReport>;

    async fn health(&self) -> AuthResult<()>;
}

#[derive(Clone)]
pub struct StorageFacade {
    context: Arc<IdpContext>,
}

impl StorageFacade {
    #[must_use]
    pub fn new(context: IdpContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    #[must_use]
    pub fn context(&self) -> &IdpContext {
        &self.context
    }

    fn bridge(&self) -> AuthResult<&DelegatedBridge> {
        self.context
            .bridge
            .as_deref()
            .ok_or_else(|| AuthError::configuration("delegated login is not configured"))
    }

    /// Upstream URL that starts delegated login for a pending request.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when no upstream is configured, or the
    /// bridge's error.
    pub async fn start_delegated_login(&self, auth_request_id: Uuid) -> AuthResult<Url> {
        self.bridge()?.start(auth_request_id).await
    }

    /// Completes delegated login from the upstream callback.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when no upstream is configured, or the
    /// bridge's error.
    pub async fn delegated_callback(&self, params: CallbackParams) -> AuthResult<AuthRequest> {
        self.bridge()?.callback(params).await
    }

    /// # Errors
    ///
    /// Returns `InvalidRequest` for an invalid client definition.
    pub async fn create_client(&self, options: ClientOptions) -> AuthResult<Client> {
        self.context.registry.create(options).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown client.
    pub async fn read_client(&self, id: &str) -> AuthResult<Client> {
        self.context.registry.read(id).await
    }

    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed cursor.
    pub async fn list_clients(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> AuthResult<Page<Client>> {
        self.context.registry.list(cursor, page_size).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown client, `InvalidRequest` if the
    /// patched client is invalid.
    pub async fn update_client(&self, id: &str, patch: ClientPatch) -> AuthResult<Client> {
        self.context.registry.update(id, patch).await
    }

    /// Deletes a client with its secrets and revokes its tokens. Unknown
    /// ids succeed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn delete_client(&self, id: &str) -> AuthResult<()> {
        self.context.registry.delete(id).await
    }

    /// Generates a secret. The plaintext is only in the returned value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown client.
    pub async fn create_secret(
        &self,
        client_id: &str,
        name: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> AuthResult<CreatedSecret> {
        self.context.vault.create(client_id, name, metadata).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the secret does not belong to the client.
    pub async fn delete_secret(&self, client_id: &str, secret_id: &str) -> AuthResult<()> {
        self.context.vault.delete(client_id, secret_id).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub async fn read_user(&self, id: &str) -> AuthResult<User> {
        self.context
            .stores
            .users
            .find_user(id)
            .await?
            .ok_or_else(|| AuthError::not_found("user", id))
    }

    /// Lists users in id order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed cursor.
    pub async fn list_users(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> AuthResult<Page<User>> {
        let after = cursor.map(storage::decode_cursor).transpose()?;
        let limit = storage::page_size(page_size);
        let rows = self
            .context
            .stores
            .users
            .list_users(after.as_deref(), limit + 1)
            .await?;
        Ok(Page::from_rows(rows, limit, |u| u.id.as_str()))
    }
}

#[async_trait]
impl OidcStorage for StorageFacade {
    async fn get_client(&self, client_id: &str) -> AuthResult<Option<Client>> {
        self.context.stores.clients.find_client(client_id).await
    }

    async fn verify_client_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool> {
        self.context.vault.verify(client_id, secret).await
    }

    async fn create_auth_request(&self, request: NewAuthRequest) -> AuthResult<AuthRequest> {
        self.context.auth_requests.create(request).await
    }

    async fn auth_request_by_id(&self, id: Uuid) -> AuthResult<Option<AuthRequest>> {
        self.context.auth_requests.find(id).await
    }

    async fn authenticate_auth_request(&self, id: Uuid, subject: &str) -> AuthResult<AuthRequest> {
        self.context.auth_requests.authenticate(id, subject).await
    }

    async fn exchange_auth_request(
        &self,
        id: Uuid,
        code_verifier: Option<&str>,
    ) -> AuthResult<AuthRequest> {
        self.context.auth_requests.exchange(id, code_verifier).await
    }

    async fn issue_access_token(
        &self,
        client_id: &str,
        subject: Option<&str>,
        scopes: &[String],
        audience: Vec<String>,
    ) -> AuthResult<IssuedToken> {
        let client = self
            .get_client(client_id)
            .await?
            .ok_or_else(|| AuthError::not_found("client", client_id))?;
        self.context
            .tokens
            .issue_access_token(&client, subject, scopes, audience)
            .await
    }

    async fn issue_refresh_token(&self, access_token_id: Uuid) -> AuthResult<IssuedToken> {
        let access = self
            .context
            .tokens
            .find(access_token_id)
            .await?
            .ok_or_else(|| AuthError::not_found("token", access_token_id.to_string()))?;
        self.context.tokens.issue_refresh_token(&access).await
    }

    async fn validate_token(&self, value: &str) -> AuthResult<Claims> {
        self.context.tokens.validate(value).await
    }

    async fn validate_access_token(&self, value: &str) -> AuthResult<Claims> {
        self.context.tokens.validate_access(value).await
    }

    async fn revoke_token(&self, id: Uuid) -> AuthResult<()> {
        self.context.tokens.revoke(id).await
    }

    async fn revoke_token_value(&self, value: &str) -> AuthResult<()> {
        self.context.tokens.revoke_value(value).await
    }

    async fn token_request(
        &self,
        request: &TokenRequest,
        authorization: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        self.context.grants.dispatch(request, authorization).await
    }

    fn signing_key(&self) -> Arc<SigningKey> {
        self.context.keys.active()
    }

    fn jwks(&self) -> Jwks {
        self.context.keys.jwks()
    }

    async fn cleanup_expired(&self) -> AuthResult<CleanupReport> {
        let report = CleanupReport {
            auth_requests: self.context.auth_requests.cleanup_expired().await?,
            tokens: self.context.tokens.cleanup_expired().await?,
        };
        tracing::info!(
            auth_requests = report.auth_requests,
            tokens = report.tokens,
            "expired records removed"
        );
        Ok(report)
    }

    async fn health(&self) -> AuthResult<()> {
        self.context.stores.health.health().await
    }
}

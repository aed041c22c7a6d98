//! In-memory storage backend.
//!
//! All tables live behind one `RwLock`, so every trait method is a single
//! critical section and multi-table operations (client deletion, refresh
//! rotation) are atomic. The lock is never held across an `.await`.
//!
//! Suitable for tests and single-process deployments only; multi-instance
//! deployments need a shared transactional store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AuthRequestStorage, ClientStorage, ClientUpdate, ConsumeGuard, SecretStorage, StorageHealth,
    TokenStorage, UserStorage,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::{AuthRequest, Client, Secret, Token, User};

#[derive(Default)]
struct Tables {
    /// Client definitions, stored without secret summaries.
    clients: BTreeMap<String, Client>,
    /// Secrets by client id, oldest first.
    secrets: HashMap<String, Vec<Secret>>,
    auth_requests: HashMap<Uuid, AuthRequest>,
    tokens: HashMap<Uuid, Token>,
    users: BTreeMap<String, User>,
}

impl Tables {
    fn client_view(&self, client: &Client) -> Client {
        let mut view = client.clone();
        view.secrets = self
            .secrets
            .get(&client.id)
            .map(|secrets| secrets.iter().map(Secret::summary).collect())
            .unwrap_or_default();
        view
    }

    fn revoke(&mut self, id: Uuid, at: OffsetDateTime) -> Option<Token> {
        let token = self.tokens.get_mut(&id)?;
        token.revoked_at.get_or_insert(at);
        Some(token.clone())
    }
}

/// Storage backend keeping every table in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AuthResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| AuthError::storage("memory storage lock poisoned"))
    }

    fn write(&self) -> AuthResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| AuthError::storage("memory storage lock poisoned"))
    }
}

// =============================================================================
// Clients
// =============================================================================

#[async_trait]
impl ClientStorage for MemoryStorage {
    async fn find_client(&self, id: &str) -> AuthResult<Option<Client>> {
        let tables = self.read()?;
        Ok(tables.clients.get(id).map(|c| tables.client_view(c)))
    }

    async fn create_client(&self, client: &Client) -> AuthResult<()> {
        let mut tables = self.write()?;
        if tables.clients.contains_key(&client.id) {
            return Err(AuthError::conflict(format!(
                "client {} already exists",
                client.id
            )));
        }
        let mut stored = client.clone();
        stored.secrets.clear();
        tables.clients.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn upsert_client(&self, client: &Client) -> AuthResult<()> {
        let mut tables = self.write()?;
        let mut stored = client.clone();
        stored.secrets.clear();
        if let Some(existing) = tables.clients.get(&client.id) {
            stored.created_at = existing.created_at;
        }
        tables.clients.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn update_client(&self, id: &str, update: ClientUpdate<'_>) -> AuthResult<Client> {
        let mut tables = self.write()?;
        let slot = tables
            .clients
            .get_mut(id)
            .ok_or_else(|| AuthError::not_found("client", id))?;
        let mut stored = slot.clone();
        update(&mut stored)?;
        stored.id = slot.id.clone();
        stored.secrets.clear();
        stored.created_at = slot.created_at;
        *slot = stored.clone();
        Ok(tables.client_view(&stored))
    }

    async fn delete_client(&self, id: &str, revoked_at: OffsetDateTime) -> AuthResult<bool> {
        let mut tables = self.write()?;
        if tables.clients.remove(id).is_none() {
            return Ok(false);
        }
        tables.secrets.remove(id);
        tables.auth_requests.retain(|_, r| r.client_id != id);
        for token in tables.tokens.values_mut().filter(|t| t.client_id == id) {
            token.revoked_at.get_or_insert(revoked_at);
        }
        Ok(true)
    }

    async fn list_clients(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<Client>> {
        let tables = self.read()?;
        Ok(tables
            .clients
            .values()
            .filter(|c| after.is_none_or(|after| c.id.as_str() > after))
            .take(limit)
            .map(|c| tables.client_view(c))
            .collect())
    }
}

// =============================================================================
// Secrets
// =============================================================================

#[async_trait]
impl SecretStorage for MemoryStorage {
    async fn create_secret(&self, secret: &Secret) -> AuthResult<()> {
        let mut tables = self.write()?;
        if !tables.clients.contains_key(&secret.client_id) {
            return Err(AuthError::not_found("client", &secret.client_id));
        }
        let secrets = tables.secrets.entry(secret.client_id.clone()).or_default();
        if secrets.iter().any(|s| s.id == secret.id) {
            return Err(AuthError::conflict(format!(
                "secret {} already exists",
                secret.id
            )));
        }
        secrets.push(secret.clone());
        Ok(())
    }

    async fn upsert_secret(&self, secret: &Secret) -> AuthResult<()> {
        let mut tables = self.write()?;
        if !tables.clients.contains_key(&secret.client_id) {
            return Err(AuthError::not_found("client", &secret.client_id));
        }
        let secrets = tables.secrets.entry(secret.client_id.clone()).or_default();
        match secrets.iter_mut().find(|s| s.id == secret.id) {
            Some(slot) => *slot = secret.clone(),
            None => secrets.push(secret.clone()),
        }
        Ok(())
    }

    async fn list_secrets(&self, client_id: &str) -> AuthResult<Vec<Secret>> {
        let tables = self.read()?;
        Ok(tables.secrets.get(client_id).cloned().unwrap_or_default())
    }

    async fn delete_secret(&self, client_id: &str, secret_id: &str) -> AuthResult<bool> {
        let mut tables = self.write()?;
        let Some(secrets) = tables.secrets.get_mut(client_id) else {
            return Ok(false);
        };
        let before = secrets.len();
        secrets.retain(|s| s.id != secret_id);
        Ok(secrets.len() != before)
    }
}

// =============================================================================
// Authorization requests
// =============================================================================

#[async_trait]
impl AuthRequestStorage for MemoryStorage {
    async fn create_auth_request(&self, request: &AuthRequest) -> AuthResult<()> {
        let mut tables = self.write()?;
        if !tables.clients.contains_key(&request.client_id) {
            return Err(AuthError::not_found("client", &request.client_id));
        }
        tables.auth_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthRequest>> {
        Ok(self.read()?.auth_requests.get(&id).cloned())
    }

    async fn set_upstream_state(&self, id: Uuid, state_hash: &str) -> AuthResult<()> {
        let mut tables = self.write()?;
        let request = tables
            .auth_requests
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("auth request", id.to_string()))?;
        if request.done || request.consumed_at.is_some() {
            return Err(AuthError::conflict(format!(
                "authorization request {id} is no longer pending"
            )));
        }
        request.upstream_state_hash = Some(state_hash.to_string());
        Ok(())
    }

    async fn find_auth_request_by_upstream_state(
        &self,
        state_hash: &str,
    ) -> AuthResult<Option<AuthRequest>> {
        Ok(self
            .read()?
            .auth_requests
            .values()
            .find(|r| r.upstream_state_hash.as_deref() == Some(state_hash))
            .cloned())
    }

    async fn authenticate_auth_request(
        &self,
        id: Uuid,
        subject: &str,
    ) -> AuthResult<AuthRequest> {
        let mut tables = self.write()?;
        let request = tables
            .auth_requests
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("auth request", id.to_string()))?;
        if request.consumed_at.is_some() {
            return Err(AuthError::conflict(format!(
                "authorization request {id} was already consumed"
            )));
        }
        request.subject = Some(subject.to_string());
        request.done = true;
        Ok(request.clone())
    }

    async fn consume_auth_request(
        &self,
        id: Uuid,
        consumed_at: OffsetDateTime,
        guard: ConsumeGuard<'_>,
    ) -> AuthResult<AuthRequest> {
        let mut tables = self.write()?;
        let request = tables
            .auth_requests
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("auth request", id.to_string()))?;
        guard(request)?;
        if request.consumed_at.is_some() {
            return Err(AuthError::replay(id.to_string()));
        }
        request.consumed_at = Some(consumed_at);
        Ok(request.clone())
    }

    async fn delete_expired_auth_requests(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut tables = self.write()?;
        let before = tables.auth_requests.len();
        tables.auth_requests.retain(|_, r| !r.is_expired_at(now));
        Ok((before - tables.auth_requests.len()) as u64)
    }
}

// =============================================================================
// Tokens
// =============================================================================

#[async_trait]
impl TokenStorage for MemoryStorage {
    async fn insert_token(&self, token: &Token) -> AuthResult<()> {
        self.write()?.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn attach_refresh_token(
        &self,
        access_token_id: Uuid,
        refresh: &Token,
    ) -> AuthResult<()> {
        let mut tables = self.write()?;
        let access = tables
            .tokens
            .get_mut(&access_token_id)
            .ok_or_else(|| AuthError::not_found("token", access_token_id.to_string()))?;
        access.refresh_token_id = Some(refresh.id);
        tables.tokens.insert(refresh.id, refresh.clone());
        Ok(())
    }

    async fn find_token(&self, id: Uuid) -> AuthResult<Option<Token>> {
        Ok(self.read()?.tokens.get(&id).cloned())
    }

    async fn find_token_by_hash(&self, token_hash: &str) -> AuthResult<Option<Token>> {
        Ok(self
            .read()?
            .tokens
            .values()
            .find(|t| t.token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn revoke_token(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<bool> {
        let mut tables = self.write()?;
        let Some(token) = tables.revoke(id, at) else {
            return Ok(false);
        };
        for linked in [token.refresh_token_id, token.access_token_id]
            .into_iter()
            .flatten()
        {
            tables.revoke(linked, at);
        }
        Ok(true)
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_id: Uuid,
        new_access: &Token,
        new_refresh: &Token,
        at: OffsetDateTime,
    ) -> AuthResult<()> {
        let mut tables = self.write()?;
        let old = tables
            .tokens
            .get_mut(&old_refresh_id)
            .ok_or_else(|| AuthError::not_found("token", old_refresh_id.to_string()))?;
        if old.revoked_at.is_some() {
            return Err(AuthError::TokenRevoked);
        }
        old.revoked_at = Some(at);
        old.replaced_by = Some(new_refresh.id);

        let mut access = new_access.clone();
        access.refresh_token_id = Some(new_refresh.id);
        tables.tokens.insert(access.id, access);
        tables.tokens.insert(new_refresh.id, new_refresh.clone());
        Ok(())
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut tables = self.write()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.expires_at > now);
        Ok((before - tables.tokens.len()) as u64)
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserStorage for MemoryStorage {
    async fn upsert_user(&self, subject: &str, email: Option<&str>) -> AuthResult<User> {
        let mut tables = self.write()?;
        if let Some(user) = tables.users.values_mut().find(|u| u.subject == subject) {
            if let Some(email) = email {
                user.email = Some(email.to_string());
            }
            return Ok(user.clone());
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            email: email.map(str::to_string),
            created_at: crate::now_seconds(),
        };
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> AuthResult<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn list_users(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<User>> {
        let tables = self.read()?;
        Ok(tables
            .users
            .values()
            .filter(|u| after.is_none_or(|after| u.id.as_str() > after))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StorageHealth for MemoryStorage {
    async fn health(&self) -> AuthResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientOptions, NewAuthRequest, TokenKind};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn client(id: &str) -> Client {
        Client::from_options(id.to_string(), ClientOptions::default())
    }

    fn secret(client_id: &str, id: &str) -> Secret {
        Secret {
            id: id.to_string(),
            client_id: client_id.to_string(),
            name: None,
            hash: "hash".to_string(),
            last_digits: "abcd".to_string(),
            metadata: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn token(client_id: &str, kind: TokenKind) -> Token {
        let now = crate::now_seconds();
        Token {
            id: Uuid::new_v4(),
            kind,
            client_id: client_id.to_string(),
            subject: None,
            scopes: vec![],
            audience: vec![],
            issued_at: now,
            expires_at: now + Duration::from_secs(60),
            token_hash: None,
            refresh_token_id: None,
            access_token_id: None,
            replaced_by: None,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_client_includes_secret_summaries() {
        let storage = MemoryStorage::new();
        storage.create_client(&client("c1")).await.unwrap();
        storage.create_secret(&secret("c1", "s1")).await.unwrap();

        let found = storage.find_client("c1").await.unwrap().unwrap();
        assert_eq!(found.secrets.len(), 1);
        assert_eq!(found.secrets[0].id, "s1");
    }

    #[tokio::test]
    async fn test_create_duplicate_client_conflicts() {
        let storage = MemoryStorage::new();
        storage.create_client(&client("c1")).await.unwrap();
        let err = storage.create_client(&client("c1")).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_secret_requires_client() {
        let storage = MemoryStorage::new();
        let err = storage.create_secret(&secret("nope", "s1")).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_client_cascades() {
        let storage = MemoryStorage::new();
        storage.create_client(&client("c1")).await.unwrap();
        storage.create_secret(&secret("c1", "s1")).await.unwrap();
        let request = AuthRequest::new(
            NewAuthRequest {
                client_id: "c1".to_string(),
                ..Default::default()
            },
            Duration::from_secs(600),
        );
        storage.create_auth_request(&request).await.unwrap();
        let t = token("c1", TokenKind::Access);
        storage.insert_token(&t).await.unwrap();

        let at = crate::now_seconds();
        assert!(storage.delete_client("c1", at).await.unwrap());
        assert!(!storage.delete_client("c1", at).await.unwrap());

        assert!(storage.list_secrets("c1").await.unwrap().is_empty());
        assert!(storage.find_auth_request(request.id).await.unwrap().is_none());
        let revoked = storage.find_token(t.id).await.unwrap().unwrap();
        assert_eq!(revoked.revoked_at, Some(at));
    }

    #[tokio::test]
    async fn test_list_clients_pages_by_id() {
        let storage = MemoryStorage::new();
        for id in ["c", "a", "b"] {
            storage.create_client(&client(id)).await.unwrap();
        }
        let first: Vec<_> = storage
            .list_clients(None, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(first, vec!["a", "b"]);
        let rest = storage.list_clients(Some("b"), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "c");
    }

    #[tokio::test]
    async fn test_revoke_cascades_to_pair() {
        let storage = MemoryStorage::new();
        let access = token("c1", TokenKind::Access);
        let mut refresh = token("c1", TokenKind::Refresh);
        refresh.access_token_id = Some(access.id);
        storage.insert_token(&access).await.unwrap();
        storage.attach_refresh_token(access.id, &refresh).await.unwrap();

        assert!(storage.revoke_token(refresh.id, OffsetDateTime::now_utc()).await.unwrap());
        assert!(storage.find_token(access.id).await.unwrap().unwrap().is_revoked());
        assert!(!storage.revoke_token(Uuid::new_v4(), OffsetDateTime::now_utc()).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotation_is_compare_and_swap() {
        let storage = MemoryStorage::new();
        let refresh = token("c1", TokenKind::Refresh);
        storage.insert_token(&refresh).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let (a1, r1) = (token("c1", TokenKind::Access), token("c1", TokenKind::Refresh));
        storage
            .rotate_refresh_token(refresh.id, &a1, &r1, now)
            .await
            .unwrap();

        let (a2, r2) = (token("c1", TokenKind::Access), token("c1", TokenKind::Refresh));
        let err = storage
            .rotate_refresh_token(refresh.id, &a2, &r2, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));

        let old = storage.find_token(refresh.id).await.unwrap().unwrap();
        assert_eq!(old.replaced_by, Some(r1.id));
        let access = storage.find_token(a1.id).await.unwrap().unwrap();
        assert_eq!(access.refresh_token_id, Some(r1.id));
    }

    #[tokio::test]
    async fn test_upsert_user_by_subject() {
        let storage = MemoryStorage::new();
        let first = storage.upsert_user("upstream-1", None).await.unwrap();
        let second = storage
            .upsert_user("upstream-1", Some("a@example.com"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.email.as_deref(), Some("a@example.com"));
        assert_eq!(storage.list_users(None, 10).await.unwrap().len(), 1);
    }
}

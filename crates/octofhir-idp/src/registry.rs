//! Client registry.
//!
//! CRUD over client records. Reads never expose secret hashes: clients carry
//! [`SecretSummary`](crate::types::SecretSummary) values only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::AuthResult;
use crate::config::StaticClient;
use crate::error::AuthError;
use crate::storage::{self, ClientStorage, Page, Stores};
use crate::types::{Client, ClientOptions, ClientPatch};
use crate::vault::SecretVault;

#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<dyn ClientStorage>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(stores: &Stores) -> Self {
        Self {
            clients: stores.clients.clone(),
        }
    }

    /// Creates a client with a generated id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the client fails validation.
    pub async fn create(&self, options: ClientOptions) -> AuthResult<Client> {
        self.create_with_id(Uuid::new_v4().to_string(), options)
            .await
    }

    /// Creates a client with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` on validation failure or `Conflict` if the id
    /// is taken.
    pub async fn create_with_id(&self, id: String, options: ClientOptions) -> AuthResult<Client> {
        let client = Client::from_options(id, options);
        client.validate()?;
        self.clients.create_client(&client).await?;
        tracing::info!(client_id = %client.id, public = client.public, "client created");
        Ok(client)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub async fn read(&self, id: &str) -> AuthResult<Client> {
        self.clients
            .find_client(id)
            .await?
            .ok_or_else(|| AuthError::not_found("client", id))
    }

    /// Lists clients in id order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed cursor.
    pub async fn list(&self, cursor: Option<&str>, page_size: Option<usize>) -> AuthResult<Page<Client>> {
        let after = cursor.map(storage::decode_cursor).transpose()?;
        let limit = storage::page_size(page_size);
        let rows = self.clients.list_clients(after.as_deref(), limit + 1).await?;
        Ok(Page::from_rows(rows, limit, |c| c.id.as_str()))
    }

    /// Applies a partial update. The read-modify-write runs atomically in
    /// the backend, so concurrent patches of one client never drop each
    /// other's fields.
    ///
    /// Turning a client public keeps its secrets, which then go unused.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidRequest`.
    pub async fn update(&self, id: &str, patch: ClientPatch) -> AuthResult<Client> {
        let became_public = AtomicBool::new(false);
        let update = |client: &mut Client| -> AuthResult<()> {
            let was_public = client.public;
            client.apply(patch.clone());
            client.validate()?;
            became_public.store(client.public && !was_public, Ordering::Relaxed);
            Ok(())
        };
        let client = self.clients.update_client(id, &update).await?;

        if became_public.load(Ordering::Relaxed) && !client.secrets.is_empty() {
            tracing::info!(
                client_id = id,
                secrets = client.secrets.len(),
                "client became public; existing secrets are no longer checked"
            );
        }
        tracing::info!(client_id = id, "client updated");
        Ok(client)
    }

    /// Deletes a client, its secrets and pending requests, and revokes its
    /// tokens. Deleting an unknown client succeeds.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn delete(&self, id: &str) -> AuthResult<()> {
        if self.clients.delete_client(id, crate::now_seconds()).await? {
            tracing::info!(client_id = id, "client deleted");
        } else {
            tracing::debug!(client_id = id, "delete of unknown client");
        }
        Ok(())
    }

    /// Upserts configuration-defined clients and their secrets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if a definition is invalid, or a storage
    /// error.
    pub async fn seed_static(&self, definitions: &[StaticClient], vault: &SecretVault) -> AuthResult<()> {
        for definition in definitions {
            let client = definition.to_client();
            client.validate()?;
            self.clients.upsert_client(&client).await?;
            vault.seed_static(&client.id, &definition.secrets).await?;
            tracing::info!(client_id = %client.id, "static client seeded");
        }
        Ok(())
    }
}

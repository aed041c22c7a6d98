//! OAuth client storage.
//!
//! Client definitions live in `idp_client`; secret summaries are joined in
//! from `idp_secret` on every read.

use async_trait::async_trait;
use octofhir_idp::storage::{ClientStorage, ClientUpdate};
use octofhir_idp::{AuthError, AuthResult, Client};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::secret::{metadata_from_json, metadata_to_json, summaries_for};
use crate::{PostgresIdpStorage, StorageError, StorageResult, db_error};

// =============================================================================
// Rows
// =============================================================================

type ClientTuple = (
    String,
    String,
    Option<String>,
    bool,
    bool,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    serde_json::Value,
    OffsetDateTime,
);

const CLIENT_COLUMNS: &str = "id, name, description, public, trusted, redirect_uris, \
                              post_logout_redirect_uris, scopes, metadata, created_at";

/// Build a client without its secret summaries.
fn client_from_tuple(row: ClientTuple) -> StorageResult<Client> {
    let (
        id,
        name,
        description,
        public,
        trusted,
        redirect_uris,
        post_logout_redirect_uris,
        scopes,
        metadata,
        created_at,
    ) = row;
    Ok(Client {
        id,
        name,
        description,
        public,
        trusted,
        redirect_uris,
        post_logout_redirect_uris,
        scopes,
        metadata: metadata_from_json(metadata)?,
        secrets: Vec::new(),
        created_at,
    })
}

impl PostgresIdpStorage {
    async fn with_summaries(&self, rows: Vec<ClientTuple>) -> StorageResult<Vec<Client>> {
        let mut clients = rows
            .into_iter()
            .map(client_from_tuple)
            .collect::<StorageResult<Vec<_>>>()?;
        if clients.is_empty() {
            return Ok(clients);
        }
        let ids: Vec<String> = clients.iter().map(|c| c.id.clone()).collect();
        let mut summaries = summaries_for(self.pool(), &ids).await?;
        for client in &mut clients {
            client.secrets = summaries.remove(&client.id).unwrap_or_default();
        }
        Ok(clients)
    }
}

// =============================================================================
// Client Storage
// =============================================================================

#[async_trait]
impl ClientStorage for PostgresIdpStorage {
    async fn find_client(&self, id: &str) -> AuthResult<Option<Client>> {
        let row: Option<ClientTuple> =
            query_as(&format!("SELECT {CLIENT_COLUMNS} FROM idp_client WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.with_summaries(vec![row]).await?.pop())
    }

    async fn create_client(&self, client: &Client) -> AuthResult<()> {
        let metadata = metadata_to_json(&client.metadata)?;
        query(
            r#"
            INSERT INTO idp_client (id, name, description, public, trusted, redirect_uris,
                                    post_logout_redirect_uris, scopes, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(client.public)
        .bind(client.trusted)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.scopes)
        .bind(&metadata)
        .bind(client.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| StorageError::on_insert(e, &format!("client {}", client.id)))?;

        tracing::debug!(client_id = %client.id, "client row inserted");
        Ok(())
    }

    async fn upsert_client(&self, client: &Client) -> AuthResult<()> {
        let metadata = metadata_to_json(&client.metadata)?;
        query(
            r#"
            INSERT INTO idp_client (id, name, description, public, trusted, redirect_uris,
                                    post_logout_redirect_uris, scopes, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                public = EXCLUDED.public,
                trusted = EXCLUDED.trusted,
                redirect_uris = EXCLUDED.redirect_uris,
                post_logout_redirect_uris = EXCLUDED.post_logout_redirect_uris,
                scopes = EXCLUDED.scopes,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(client.public)
        .bind(client.trusted)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.scopes)
        .bind(&metadata)
        .bind(client.created_at)
        .execute(self.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_client(&self, id: &str, update: ClientUpdate<'_>) -> AuthResult<Client> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let row: Option<ClientTuple> = query_as(&format!(
            "SELECT {CLIENT_COLUMNS} FROM idp_client WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        let row = row.ok_or_else(|| AuthError::not_found("client", id))?;

        let stored = client_from_tuple(row)?;
        let mut client = stored.clone();
        update(&mut client)?;

        let metadata = metadata_to_json(&client.metadata)?;
        query(
            r#"
            UPDATE idp_client
            SET name = $2,
                description = $3,
                public = $4,
                trusted = $5,
                redirect_uris = $6,
                post_logout_redirect_uris = $7,
                scopes = $8,
                metadata = $9
            WHERE id = $1
            "#,
        )
        .bind(&stored.id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(client.public)
        .bind(client.trusted)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.scopes)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        client.id = stored.id;
        client.created_at = stored.created_at;
        client.secrets = summaries_for(self.pool(), std::slice::from_ref(&client.id))
            .await?
            .remove(&client.id)
            .unwrap_or_default();
        Ok(client)
    }

    async fn delete_client(&self, id: &str, revoked_at: OffsetDateTime) -> AuthResult<bool> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        // Secrets and auth requests go with the row (ON DELETE CASCADE).
        let deleted = query("DELETE FROM idp_client WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        let revoked = query(
            "UPDATE idp_token SET revoked_at = $2 WHERE client_id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(revoked_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::debug!(
            client_id = %id,
            tokens_revoked = revoked.rows_affected(),
            "client row deleted"
        );
        Ok(true)
    }

    async fn list_clients(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<Client>> {
        let rows: Vec<ClientTuple> = query_as(&format!(
            r#"
            SELECT {CLIENT_COLUMNS}
            FROM idp_client
            WHERE $1::TEXT IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#
        ))
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .map_err(db_error)?;

        Ok(self.with_summaries(rows).await?)
    }
}

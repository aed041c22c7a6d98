//! Client secret storage.
//!
//! Only Argon2id hashes are stored; the plaintext never reaches this crate.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use octofhir_idp::storage::SecretStorage;
use octofhir_idp::{AuthError, AuthResult, Secret, SecretSummary};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, PostgresIdpStorage, StorageError, StorageResult, db_error};

// =============================================================================
// Rows
// =============================================================================

pub(crate) type SecretTuple = (
    String,
    String,
    Option<String>,
    String,
    String,
    serde_json::Value,
    OffsetDateTime,
);

pub(crate) const SECRET_COLUMNS: &str =
    "client_id, id, name, hash, last_digits, metadata, created_at";

pub(crate) fn secret_from_tuple(row: SecretTuple) -> StorageResult<Secret> {
    let (client_id, id, name, hash, last_digits, metadata, created_at) = row;
    Ok(Secret {
        id,
        client_id,
        name,
        hash,
        last_digits,
        metadata: metadata_from_json(metadata)?,
        created_at,
    })
}

pub(crate) fn metadata_to_json(metadata: &BTreeMap<String, String>) -> StorageResult<serde_json::Value> {
    Ok(serde_json::to_value(metadata)?)
}

pub(crate) fn metadata_from_json(value: serde_json::Value) -> StorageResult<BTreeMap<String, String>> {
    Ok(serde_json::from_value(value)?)
}

/// Secret summaries of the given clients, oldest first, keyed by client id.
pub(crate) async fn summaries_for(
    pool: &PgPool,
    client_ids: &[String],
) -> StorageResult<HashMap<String, Vec<SecretSummary>>> {
    let rows: Vec<SecretTuple> = query_as(&format!(
        "SELECT {SECRET_COLUMNS} FROM idp_secret WHERE client_id = ANY($1) ORDER BY created_at, id"
    ))
    .bind(client_ids)
    .fetch_all(pool)
    .await?;

    let mut summaries: HashMap<String, Vec<SecretSummary>> = HashMap::new();
    for row in rows {
        let secret = secret_from_tuple(row)?;
        summaries
            .entry(secret.client_id.clone())
            .or_default()
            .push(secret.summary());
    }
    Ok(summaries)
}

fn missing_client(err: StorageError, client_id: &str) -> AuthError {
    if err.is_not_found() {
        AuthError::not_found("client", client_id)
    } else {
        err.into()
    }
}

// =============================================================================
// Secret Storage
// =============================================================================

#[async_trait]
impl SecretStorage for PostgresIdpStorage {
    async fn create_secret(&self, secret: &Secret) -> AuthResult<()> {
        let metadata = metadata_to_json(&secret.metadata)?;
        query(
            r#"
            INSERT INTO idp_secret (client_id, id, name, hash, last_digits, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&secret.client_id)
        .bind(&secret.id)
        .bind(&secret.name)
        .bind(&secret.hash)
        .bind(&secret.last_digits)
        .bind(&metadata)
        .bind(secret.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            missing_client(
                StorageError::on_insert(e, &format!("secret {}", secret.id)),
                &secret.client_id,
            )
        })?;
        Ok(())
    }

    async fn upsert_secret(&self, secret: &Secret) -> AuthResult<()> {
        let metadata = metadata_to_json(&secret.metadata)?;
        query(
            r#"
            INSERT INTO idp_secret (client_id, id, name, hash, last_digits, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (client_id, id) DO UPDATE SET
                name = EXCLUDED.name,
                hash = EXCLUDED.hash,
                last_digits = EXCLUDED.last_digits,
                metadata = EXCLUDED.metadata,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&secret.client_id)
        .bind(&secret.id)
        .bind(&secret.name)
        .bind(&secret.hash)
        .bind(&secret.last_digits)
        .bind(&metadata)
        .bind(secret.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            missing_client(
                StorageError::on_insert(e, &format!("secret {}", secret.id)),
                &secret.client_id,
            )
        })?;
        Ok(())
    }

    async fn list_secrets(&self, client_id: &str) -> AuthResult<Vec<Secret>> {
        let rows: Vec<SecretTuple> = query_as(&format!(
            "SELECT {SECRET_COLUMNS} FROM idp_secret WHERE client_id = $1 ORDER BY created_at, id"
        ))
        .bind(client_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|row| secret_from_tuple(row).map_err(AuthError::from))
            .collect()
    }

    async fn delete_secret(&self, client_id: &str, secret_id: &str) -> AuthResult<bool> {
        let result = query("DELETE FROM idp_secret WHERE client_id = $1 AND id = $2")
            .bind(client_id)
            .bind(secret_id)
            .execute(self.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

//! Token record storage.
//!
//! Opaque values are never stored; lookups by value go through
//! `token_hash`. Revocation and rotation lock the affected rows, so a
//! refresh token can be rotated at most once even with several instances
//! serving the token endpoint.

use async_trait::async_trait;
use octofhir_idp::storage::TokenStorage;
use octofhir_idp::{AuthError, AuthResult, Token, TokenKind};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PostgresIdpStorage, StorageError, StorageResult, db_error};

// =============================================================================
// Rows
// =============================================================================

type TokenTuple = (
    Uuid,
    String,
    String,
    Option<String>,
    Vec<String>,
    Vec<String>,
    OffsetDateTime,
    OffsetDateTime,
    Option<String>,
    Option<Uuid>,
    Option<Uuid>,
    Option<Uuid>,
    Option<OffsetDateTime>,
);

const TOKEN_COLUMNS: &str = "id, kind, client_id, subject, scopes, audience, issued_at, \
                             expires_at, token_hash, refresh_token_id, access_token_id, \
                             replaced_by, revoked_at";

fn token_from_tuple(row: TokenTuple) -> StorageResult<Token> {
    let (
        id,
        kind,
        client_id,
        subject,
        scopes,
        audience,
        issued_at,
        expires_at,
        token_hash,
        refresh_token_id,
        access_token_id,
        replaced_by,
        revoked_at,
    ) = row;
    let kind: TokenKind = kind
        .parse()
        .map_err(|e: AuthError| StorageError::invalid_input(format!("token {id}: {e}")))?;
    Ok(Token {
        id,
        kind,
        client_id,
        subject,
        scopes,
        audience,
        issued_at,
        expires_at,
        token_hash,
        refresh_token_id,
        access_token_id,
        replaced_by,
        revoked_at,
    })
}

async fn insert_row(conn: &mut PgConnection, token: &Token) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO idp_token (id, kind, client_id, subject, scopes, audience, issued_at,
                               expires_at, token_hash, refresh_token_id, access_token_id,
                               replaced_by, revoked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(token.id)
    .bind(token.kind.as_str())
    .bind(&token.client_id)
    .bind(&token.subject)
    .bind(&token.scopes)
    .bind(&token.audience)
    .bind(token.issued_at)
    .bind(token.expires_at)
    .bind(&token.token_hash)
    .bind(token.refresh_token_id)
    .bind(token.access_token_id)
    .bind(token.replaced_by)
    .bind(token.revoked_at)
    .execute(conn)
    .await
    .map_err(|e| StorageError::on_insert(e, &format!("token {}", token.id)))?;
    Ok(())
}

// =============================================================================
// Token Storage
// =============================================================================

#[async_trait]
impl TokenStorage for PostgresIdpStorage {
    async fn insert_token(&self, token: &Token) -> AuthResult<()> {
        let mut conn = self.pool().acquire().await.map_err(db_error)?;
        insert_row(&mut conn, token).await?;
        Ok(())
    }

    async fn attach_refresh_token(
        &self,
        access_token_id: Uuid,
        refresh: &Token,
    ) -> AuthResult<()> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let linked = query("UPDATE idp_token SET refresh_token_id = $2 WHERE id = $1")
            .bind(access_token_id)
            .bind(refresh.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if linked.rows_affected() == 0 {
            return Err(AuthError::not_found("token", access_token_id.to_string()));
        }
        insert_row(&mut tx, refresh).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn find_token(&self, id: Uuid) -> AuthResult<Option<Token>> {
        let row: Option<TokenTuple> =
            query_as(&format!("SELECT {TOKEN_COLUMNS} FROM idp_token WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(db_error)?;

        Ok(row.map(token_from_tuple).transpose()?)
    }

    async fn find_token_by_hash(&self, token_hash: &str) -> AuthResult<Option<Token>> {
        let row: Option<TokenTuple> =
            query_as(&format!("SELECT {TOKEN_COLUMNS} FROM idp_token WHERE token_hash = $1"))
                .bind(token_hash)
                .fetch_optional(self.pool())
                .await
                .map_err(db_error)?;

        Ok(row.map(token_from_tuple).transpose()?)
    }

    async fn revoke_token(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<bool> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let links: Option<(Option<Uuid>, Option<Uuid>)> = query_as(
            r#"
            UPDATE idp_token
            SET revoked_at = COALESCE(revoked_at, $2)
            WHERE id = $1
            RETURNING refresh_token_id, access_token_id
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some((refresh_token_id, access_token_id)) = links else {
            return Ok(false);
        };
        let linked: Vec<Uuid> = [refresh_token_id, access_token_id]
            .into_iter()
            .flatten()
            .collect();
        if !linked.is_empty() {
            query(
                "UPDATE idp_token SET revoked_at = $2 WHERE id = ANY($1) AND revoked_at IS NULL",
            )
            .bind(&linked)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_id: Uuid,
        new_access: &Token,
        new_refresh: &Token,
        at: OffsetDateTime,
    ) -> AuthResult<()> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let old: Option<(Option<OffsetDateTime>,)> =
            query_as("SELECT revoked_at FROM idp_token WHERE id = $1 FOR UPDATE")
                .bind(old_refresh_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        match old {
            None => return Err(AuthError::not_found("token", old_refresh_id.to_string())),
            Some((Some(_),)) => return Err(AuthError::TokenRevoked),
            Some((None,)) => {}
        }

        query("UPDATE idp_token SET revoked_at = $2, replaced_by = $3 WHERE id = $1")
            .bind(old_refresh_id)
            .bind(at)
            .bind(new_refresh.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let mut access = new_access.clone();
        access.refresh_token_id = Some(new_refresh.id);
        insert_row(&mut tx, &access).await?;
        insert_row(&mut tx, new_refresh).await?;

        tx.commit().await.map_err(db_error)?;
        tracing::debug!(
            token_id = %old_refresh_id,
            replaced_by = %new_refresh.id,
            "refresh token rotated"
        );
        Ok(())
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM idp_token WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

//! Authorization request storage.
//!
//! Consumption locks the row with `SELECT ... FOR UPDATE` inside a
//! transaction, so two instances exchanging the same code serialize on the
//! database and exactly one of them sees `consumed_at` unset.

use async_trait::async_trait;
use octofhir_idp::oauth::PkceChallengeMethod;
use octofhir_idp::storage::{AuthRequestStorage, ConsumeGuard};
use octofhir_idp::{AuthError, AuthRequest, AuthResult};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PostgresIdpStorage, StorageError, StorageResult, db_error};

// =============================================================================
// Rows
// =============================================================================

type AuthRequestTuple = (
    Uuid,
    String,
    Option<String>,
    Vec<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    bool,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
    Option<String>,
);

const AUTH_REQUEST_COLUMNS: &str = "id, client_id, subject, scopes, state, nonce, redirect_uri, \
                                    code_challenge, code_challenge_method, done, created_at, \
                                    expires_at, consumed_at, upstream_state_hash";

fn auth_request_from_tuple(row: AuthRequestTuple) -> StorageResult<AuthRequest> {
    let (
        id,
        client_id,
        subject,
        scopes,
        state,
        nonce,
        redirect_uri,
        code_challenge,
        code_challenge_method,
        done,
        created_at,
        expires_at,
        consumed_at,
        upstream_state_hash,
    ) = row;
    let code_challenge_method = code_challenge_method
        .as_deref()
        .map(PkceChallengeMethod::parse)
        .transpose()
        .map_err(|e| StorageError::invalid_input(format!("auth request {id}: {e}")))?;
    Ok(AuthRequest {
        id,
        client_id,
        subject,
        scopes,
        state,
        nonce,
        redirect_uri,
        code_challenge,
        code_challenge_method,
        done,
        created_at,
        expires_at,
        consumed_at,
        upstream_state_hash,
    })
}

// =============================================================================
// Auth Request Storage
// =============================================================================

#[async_trait]
impl AuthRequestStorage for PostgresIdpStorage {
    async fn create_auth_request(&self, request: &AuthRequest) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO idp_auth_request (id, client_id, subject, scopes, state, nonce,
                                          redirect_uri, code_challenge, code_challenge_method,
                                          done, created_at, expires_at, consumed_at,
                                          upstream_state_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(request.id)
        .bind(&request.client_id)
        .bind(&request.subject)
        .bind(&request.scopes)
        .bind(&request.state)
        .bind(&request.nonce)
        .bind(&request.redirect_uri)
        .bind(&request.code_challenge)
        .bind(request.code_challenge_method.map(|m| m.as_str()))
        .bind(request.done)
        .bind(request.created_at)
        .bind(request.expires_at)
        .bind(request.consumed_at)
        .bind(&request.upstream_state_hash)
        .execute(self.pool())
        .await
        .map_err(|e| {
            let err = StorageError::on_insert(e, &format!("auth request {}", request.id));
            if err.is_not_found() {
                AuthError::not_found("client", &request.client_id)
            } else {
                err.into()
            }
        })?;
        Ok(())
    }

    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthRequest>> {
        let row: Option<AuthRequestTuple> = query_as(&format!(
            "SELECT {AUTH_REQUEST_COLUMNS} FROM idp_auth_request WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(auth_request_from_tuple).transpose()?)
    }

    async fn set_upstream_state(&self, id: Uuid, state_hash: &str) -> AuthResult<()> {
        let updated = query(
            r#"
            UPDATE idp_auth_request
            SET upstream_state_hash = $2
            WHERE id = $1 AND NOT done AND consumed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(state_hash)
        .execute(self.pool())
        .await
        .map_err(db_error)?;
        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<(Uuid,)> = query_as("SELECT id FROM idp_auth_request WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?;
        match exists {
            Some(_) => Err(AuthError::conflict(format!(
                "authorization request {id} is no longer pending"
            ))),
            None => Err(AuthError::not_found("auth request", id.to_string())),
        }
    }

    async fn find_auth_request_by_upstream_state(
        &self,
        state_hash: &str,
    ) -> AuthResult<Option<AuthRequest>> {
        let row: Option<AuthRequestTuple> = query_as(&format!(
            "SELECT {AUTH_REQUEST_COLUMNS} FROM idp_auth_request WHERE upstream_state_hash = $1"
        ))
        .bind(state_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(auth_request_from_tuple).transpose()?)
    }

    async fn authenticate_auth_request(&self, id: Uuid, subject: &str) -> AuthResult<AuthRequest> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let row: Option<AuthRequestTuple> = query_as(&format!(
            "SELECT {AUTH_REQUEST_COLUMNS} FROM idp_auth_request WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut request = match row {
            Some(row) => auth_request_from_tuple(row)?,
            None => return Err(AuthError::not_found("auth request", id.to_string())),
        };
        if request.consumed_at.is_some() {
            return Err(AuthError::conflict(format!(
                "authorization request {id} was already consumed"
            )));
        }

        query("UPDATE idp_auth_request SET subject = $2, done = TRUE WHERE id = $1")
            .bind(id)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        request.subject = Some(subject.to_string());
        request.done = true;
        Ok(request)
    }

    async fn consume_auth_request(
        &self,
        id: Uuid,
        consumed_at: OffsetDateTime,
        guard: ConsumeGuard<'_>,
    ) -> AuthResult<AuthRequest> {
        let mut tx = self.pool().begin().await.map_err(db_error)?;

        let row: Option<AuthRequestTuple> = query_as(&format!(
            "SELECT {AUTH_REQUEST_COLUMNS} FROM idp_auth_request WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut request = match row {
            Some(row) => auth_request_from_tuple(row)?,
            None => return Err(AuthError::not_found("auth request", id.to_string())),
        };

        // A failed check drops the transaction, leaving the row untouched.
        guard(&request)?;
        if request.consumed_at.is_some() {
            return Err(AuthError::replay(id.to_string()));
        }

        query("UPDATE idp_auth_request SET consumed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(consumed_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        request.consumed_at = Some(consumed_at);
        Ok(request)
    }

    async fn delete_expired_auth_requests(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM idp_auth_request WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

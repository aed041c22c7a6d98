//! Table definitions.
//!
//! Secrets and authorization requests belong to their client and are
//! removed with it. Tokens are kept after their client is deleted so
//! revocation stays observable until the records expire.

use sqlx_core::query::query;

use crate::{PgPool, StorageResult};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS idp_client (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        public BOOLEAN NOT NULL DEFAULT FALSE,
        trusted BOOLEAN NOT NULL DEFAULT FALSE,
        redirect_uris TEXT[] NOT NULL DEFAULT '{}',
        post_logout_redirect_uris TEXT[] NOT NULL DEFAULT '{}',
        scopes TEXT[] NOT NULL DEFAULT '{}',
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS idp_secret (
        client_id TEXT NOT NULL REFERENCES idp_client(id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        name TEXT,
        hash TEXT NOT NULL,
        last_digits TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (client_id, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS idp_auth_request (
        id UUID PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES idp_client(id) ON DELETE CASCADE,
        subject TEXT,
        scopes TEXT[] NOT NULL DEFAULT '{}',
        state TEXT,
        nonce TEXT,
        redirect_uri TEXT NOT NULL,
        code_challenge TEXT,
        code_challenge_method TEXT,
        done BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        consumed_at TIMESTAMPTZ,
        upstream_state_hash TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_idp_auth_request_expires_at ON idp_auth_request(expires_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_idp_auth_request_upstream_state \
     ON idp_auth_request(upstream_state_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS idp_token (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        client_id TEXT NOT NULL,
        subject TEXT,
        scopes TEXT[] NOT NULL DEFAULT '{}',
        audience TEXT[] NOT NULL DEFAULT '{}',
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        token_hash TEXT UNIQUE,
        refresh_token_id UUID,
        access_token_id UUID,
        replaced_by UUID,
        revoked_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_idp_token_client_id ON idp_token(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_idp_token_expires_at ON idp_token(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS idp_user (
        id TEXT PRIMARY KEY,
        subject TEXT UNIQUE NOT NULL,
        email TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Run every DDL statement in order. Each statement is idempotent.
pub async fn create_tables(pool: &PgPool) -> StorageResult<()> {
    for statement in STATEMENTS {
        query(statement).execute(pool).await?;
    }
    tracing::info!(statements = STATEMENTS.len(), "identity provider tables ready");
    Ok(())
}

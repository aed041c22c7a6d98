//! Database health probe.

use async_trait::async_trait;
use octofhir_idp::AuthResult;
use octofhir_idp::storage::StorageHealth;
use sqlx_core::query_scalar::query_scalar;

use crate::{PostgresIdpStorage, db_error};

#[async_trait]
impl StorageHealth for PostgresIdpStorage {
    async fn health(&self) -> AuthResult<()> {
        let _: i32 = query_scalar("SELECT 1")
            .fetch_one(self.pool())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity provider database unreachable");
                db_error(e)
            })?;
        Ok(())
    }
}

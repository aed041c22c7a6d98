//! Federated user storage.

use async_trait::async_trait;
use octofhir_idp::storage::UserStorage;
use octofhir_idp::{AuthResult, User};
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PostgresIdpStorage, db_error};

type UserTuple = (String, String, Option<String>, OffsetDateTime);

fn user_from_tuple(row: UserTuple) -> User {
    User {
        id: row.0,
        subject: row.1,
        email: row.2,
        created_at: row.3,
    }
}

#[async_trait]
impl UserStorage for PostgresIdpStorage {
    async fn upsert_user(&self, subject: &str, email: Option<&str>) -> AuthResult<User> {
        // The unique subject index settles concurrent first logins; the
        // loser's generated id is discarded.
        let row: UserTuple = query_as(
            r#"
            INSERT INTO idp_user (id, subject, email, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject) DO UPDATE
            SET email = COALESCE(EXCLUDED.email, idp_user.email)
            RETURNING id, subject, email, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(subject)
        .bind(email)
        .bind(octofhir_idp::now_seconds())
        .fetch_one(self.pool())
        .await
        .map_err(db_error)?;

        Ok(user_from_tuple(row))
    }

    async fn find_user(&self, id: &str) -> AuthResult<Option<User>> {
        let row: Option<UserTuple> =
            query_as("SELECT id, subject, email, created_at FROM idp_user WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(db_error)?;

        Ok(row.map(user_from_tuple))
    }

    async fn list_users(&self, after: Option<&str>, limit: usize) -> AuthResult<Vec<User>> {
        let rows: Vec<UserTuple> = query_as(
            r#"
            SELECT id, subject, email, created_at
            FROM idp_user
            WHERE $1::TEXT IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(user_from_tuple).collect())
    }
}

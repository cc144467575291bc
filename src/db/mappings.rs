//! Identity mapping repository.
//!
//! Admin-maintained table mapping an external account (provider + remote
//! id or login) to a role. An authenticated identity with no mapping gets
//! no grants.

use super::DbError;
use crate::auth::roles::Role;
use sqlx::SqlitePool;

/// Repository for identity mapping operations.
pub struct MappingRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MappingRepository<'a> {
    /// Create a new mapping repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a mapping.
    pub async fn set(&self, provider: &str, remote_id: &str, role: Role) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO identity_mappings (provider, remote_id, role)
            VALUES (?, ?, ?)
            ON CONFLICT (provider, remote_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(provider)
        .bind(remote_id)
        .bind(role.name())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Look up the mapped role for an identity, if any.
    pub async fn get(&self, provider: &str, remote_id: &str) -> Result<Option<Role>, DbError> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT role FROM identity_mappings
            WHERE provider = ? AND remote_id = ?
            "#,
        )
        .bind(provider)
        .bind(remote_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(name.and_then(|n| Role::parse(&n)))
    }

    /// Delete a mapping. Returns true if a row was removed.
    pub async fn delete(&self, provider: &str, remote_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM identity_mappings WHERE provider = ? AND remote_id = ?",
        )
        .bind(provider)
        .bind(remote_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all mappings as (provider, remote_id, role name) tuples.
    pub async fn list(&self) -> Result<Vec<(String, String, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT provider, remote_id, role FROM identity_mappings ORDER BY provider, remote_id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

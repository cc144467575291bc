//! Embed repository.
//!
//! An embed is a durable, unguessable pointer from a public overlay URL to
//! a capability token, optionally bound to an exact request Origin. It
//! references the token; it does not own it. Deleting an embed leaves the
//! token untouched.

use super::DbError;
use sqlx::SqlitePool;

/// A stored embed binding.
#[derive(Debug, Clone)]
pub struct EmbedRecord {
    pub embed_id: String,
    pub jti: String,
    pub created_at: i64,
    pub note: String,
    pub origin: Option<String>,
}

/// Repository for embed operations.
pub struct EmbedRepository<'a> {
    pool: &'a SqlitePool,
}

type EmbedRow = (String, String, i64, String, Option<String>);

impl<'a> EmbedRepository<'a> {
    /// Create a new embed repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an embed binding.
    pub async fn insert(
        &self,
        embed_id: &str,
        jti: &str,
        created_at: i64,
        note: &str,
        origin: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO embeds (embed_id, jti, created_at, note, origin)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(embed_id)
        .bind(jti)
        .bind(created_at)
        .bind(note)
        .bind(origin)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Point lookup by embed id.
    pub async fn get(&self, embed_id: &str) -> Result<Option<EmbedRecord>, DbError> {
        let row = sqlx::query_as::<_, EmbedRow>(
            r#"
            SELECT embed_id, jti, created_at, note, origin
            FROM embeds
            WHERE embed_id = ?
            "#,
        )
        .bind(embed_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(record_from_row))
    }

    /// Delete an embed. The referenced token is not revoked.
    pub async fn delete(&self, embed_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM embeds WHERE embed_id = ?")
            .bind(embed_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all embeds, newest first.
    pub async fn list(&self) -> Result<Vec<EmbedRecord>, DbError> {
        let rows = sqlx::query_as::<_, EmbedRow>(
            r#"
            SELECT embed_id, jti, created_at, note, origin
            FROM embeds
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }
}

fn record_from_row(row: EmbedRow) -> EmbedRecord {
    let (embed_id, jti, created_at, note, origin) = row;
    EmbedRecord {
        embed_id,
        jti,
        created_at,
        note,
        origin,
    }
}

//! Token registry repository.
//!
//! The registry is the single source of truth for revocation. Records are
//! append-only: revoke flips a flag and is irreversible; nothing is ever
//! physically deleted, so the table doubles as an audit trail.

use super::DbError;
use crate::auth::roles::Role;
use sqlx::SqlitePool;

/// A registered capability token.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub jti: String,
    pub roles: Vec<Role>,
    pub expires: i64,
    pub created_by: String,
    pub created_at: i64,
    pub revoked: bool,
    pub note: String,
}

/// Repository for token registry operations.
pub struct TokenRepository<'a> {
    pool: &'a SqlitePool,
}

type TokenRow = (String, String, i64, String, i64, bool, String);

impl<'a> TokenRepository<'a> {
    /// Create a new token repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a freshly minted token.
    pub async fn insert(
        &self,
        jti: &str,
        roles: &[Role],
        expires: i64,
        created_by: &str,
        created_at: i64,
        note: &str,
    ) -> Result<(), DbError> {
        let roles_json = serde_json::to_string(&roles)
            .map_err(|e| DbError::Internal(format!("roles serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO tokens (jti, roles, expires, created_by, created_at, revoked, note)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(jti)
        .bind(roles_json)
        .bind(expires)
        .bind(created_by)
        .bind(created_at)
        .bind(note)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Point lookup by jti.
    pub async fn get(&self, jti: &str) -> Result<Option<TokenRecord>, DbError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT jti, roles, expires, created_by, created_at, revoked, note
            FROM tokens
            WHERE jti = ?
            "#,
        )
        .bind(jti)
        .fetch_optional(self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// List all tokens, newest first.
    pub async fn list(&self) -> Result<Vec<TokenRecord>, DbError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT jti, roles, expires, created_by, created_at, revoked, note
            FROM tokens
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    /// Mark a token revoked by exact jti. Returns true if a row changed.
    pub async fn revoke(&self, jti: &str) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE tokens SET revoked = 1 WHERE jti = ?")
            .bind(jti)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark tokens revoked by jti prefix (admin convenience: the token
    /// listing shows truncated jtis). Returns true if any row changed.
    pub async fn revoke_prefix(&self, prefix: &str) -> Result<bool, DbError> {
        // An empty prefix would match every jti in the registry.
        if prefix.is_empty() {
            return Ok(false);
        }
        // Escape LIKE wildcards so a prefix of "%" cannot revoke everything.
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let result = sqlx::query("UPDATE tokens SET revoked = 1 WHERE jti LIKE ? ESCAPE '\\'")
            .bind(format!("{escaped}%"))
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn record_from_row(row: TokenRow) -> Result<TokenRecord, DbError> {
    let (jti, roles_json, expires, created_by, created_at, revoked, note) = row;
    let names: Vec<String> = serde_json::from_str(&roles_json)
        .map_err(|e| DbError::Internal(format!("roles column for {jti}: {e}")))?;
    // Unknown role names in a stored row are dropped rather than failing
    // the lookup; they grant nothing either way.
    let roles = names.iter().filter_map(|n| Role::parse(n)).collect();
    Ok(TokenRecord {
        jti,
        roles,
        expires,
        created_by,
        created_at,
        revoked,
        note,
    })
}

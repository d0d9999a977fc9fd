//! Repository for reason templates.

use super::DbError;
use sqlx::SqlitePool;

/// Repository for reason template operations.
pub struct ReasonRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReasonRepository<'a> {
    /// Create a new reason repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a template.
    pub async fn add(&self, key: &str, value: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO reasons (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Whether an alias exists.
    pub async fn has_key(&self, key: &str) -> Result<bool, DbError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM reasons WHERE key=?)")
                .bind(key)
                .fetch_one(self.pool)
                .await?;
        Ok(exists)
    }

    /// All templates.
    pub async fn list(&self) -> Result<Vec<(String, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM reasons")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    /// Remove a template. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM reasons WHERE key=?")
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! Database module for persistent storage.
//!
//! Provides async SQLite access using SQLx for the mask catalog, its
//! change log, and the reason template table.

mod masks;
mod reasons;

pub use masks::{Actor, Change, MaskRecord, MaskRepository};
pub use reasons::ReasonRepository;

use crate::mask::MaskType;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("unknown mask id {0}")]
    MaskNotFound(i64),
    #[error("mask {id} is already {mtype}")]
    AlreadyType {
        /// Catalog row asked to retype.
        id: i64,
        /// Its current, unchanged type.
        mtype: MaskType,
    },
    #[error("mask {id} has invalid type bits {bits}")]
    InvalidType {
        /// Offending catalog row.
        id: i64,
        /// The undecodable stored value.
        bits: i64,
    },
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let options = if path == ":memory:" {
            // Use file::memory: with shared cache for connection pool compatibility
            SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations, gated on table presence.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        let mut missing = false;
        for table in ["masks", "changes", "reasons"] {
            if !table_exists(pool, table).await {
                missing = true;
                break;
            }
        }

        if missing {
            Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
            info!("Database migrations applied (001_init)");
        } else {
            info!("Database already initialized");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            let sql: Vec<&str> = statement
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();

            if sql.is_empty() {
                continue;
            }
            let sql = sql.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "Migration statement failed");
                }
            }
        }
    }

    /// Get mask repository.
    pub fn masks(&self) -> MaskRepository<'_> {
        MaskRepository::new(&self.pool)
    }

    /// Get reason repository.
    pub fn reasons(&self) -> ReasonRepository<'_> {
        ReasonRepository::new(&self.pool)
    }
}

//! Repository for the mask catalog and its change log.
//!
//! Every catalog mutation appends exactly one change row inside the same
//! transaction, so the log can never drift from the rows it describes.

use super::DbError;
use crate::mask::MaskType;
use sqlx::SqlitePool;

/// Who performed a mutation: the hostmask it came from and, when known,
/// the oper name behind it.
#[derive(Debug, Clone)]
pub struct Actor {
    pub source: String,
    pub oper: Option<String>,
}

impl Actor {
    pub fn new(source: impl Into<String>, oper: Option<String>) -> Self {
        Actor {
            source: source.into(),
            oper,
        }
    }

    /// `source (oper)` when the oper name is known, bare source otherwise.
    pub fn pretty(&self) -> String {
        match &self.oper {
            Some(oper) => format!("{} ({oper})", self.source),
            None => self.source.clone(),
        }
    }
}

/// One catalog row.
#[derive(Debug, Clone)]
pub struct MaskRecord {
    pub mask: String,
    pub mtype: MaskType,
    pub enabled: bool,
    pub reason: Option<String>,
    pub hits: i64,
    pub last_hit: Option<i64>,
    pub expire: Option<i64>,
}

/// One change-log row.
#[derive(Debug, Clone)]
pub struct Change {
    pub mask_id: i64,
    pub by_source: String,
    pub by_oper: Option<String>,
    pub time: i64,
    pub change: String,
}

/// Repository for mask operations.
pub struct MaskRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MaskRepository<'a> {
    /// Create a new mask repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a mask, recording the `add` change. Returns the new id.
    pub async fn add(
        &self,
        actor: &Actor,
        mask: &str,
        mtype: MaskType,
        reason: &str,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO masks (mask, type, enabled, reason, hits)
            VALUES (?, ?, 1, ?, 0)
            "#,
        )
        .bind(mask)
        .bind(mtype.bits())
        .bind(reason)
        .execute(&mut *tx)
        .await?;
        let mask_id = result.last_insert_rowid();

        sqlx::query("INSERT INTO changes (mask_id, by_source, by_oper, time, change) VALUES (?, ?, ?, ?, ?)")
            .bind(mask_id)
            .bind(&actor.source)
            .bind(&actor.oper)
            .bind(now)
            .bind("add")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(mask_id)
    }

    /// Whether a mask id exists at all, enabled or not.
    pub async fn has_id(&self, mask_id: i64) -> Result<bool, DbError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM masks WHERE id=?)")
            .bind(mask_id)
            .fetch_one(self.pool)
            .await?;
        Ok(exists)
    }

    /// Fetch one catalog row.
    pub async fn get(&self, mask_id: i64) -> Result<MaskRecord, DbError> {
        type Row = (String, i64, bool, Option<String>, i64, Option<i64>, Option<i64>);
        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT mask, type, enabled, reason, hits, last_hit, expire
            FROM masks
            WHERE id=?
            "#,
        )
        .bind(mask_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(DbError::MaskNotFound(mask_id))?;

        let (mask, bits, enabled, reason, hits, last_hit, expire) = row;
        Ok(MaskRecord {
            mask,
            mtype: MaskType::from_bits(bits)
                .map_err(|_| DbError::InvalidType { id: mask_id, bits })?,
            enabled,
            reason,
            hits,
            last_hit,
            expire,
        })
    }

    /// Enabled masks in ascending id order.
    pub async fn list_enabled(&self) -> Result<Vec<(i64, String)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT id, mask
            FROM masks
            WHERE enabled = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Flip a mask's enabled bit, recording the change. Returns the new
    /// enabled state.
    pub async fn toggle(&self, actor: &Actor, mask_id: i64) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let enabled = sqlx::query_scalar::<_, bool>("SELECT enabled FROM masks WHERE id=?")
            .bind(mask_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::MaskNotFound(mask_id))?;
        let enabled = !enabled;

        sqlx::query("UPDATE masks SET enabled=? WHERE id=?")
            .bind(enabled)
            .bind(mask_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO changes (mask_id, by_source, by_oper, time, change) VALUES (?, ?, ?, ?, ?)")
            .bind(mask_id)
            .bind(&actor.source)
            .bind(&actor.oper)
            .bind(now)
            .bind(format!("enabled {enabled}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(enabled)
    }

    /// Change a mask's type, recording `describe` in the change log.
    /// A retype to the current type is refused and writes nothing.
    pub async fn set_type(
        &self,
        actor: &Actor,
        mask_id: i64,
        mtype: MaskType,
        describe: &str,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, i64>("SELECT type FROM masks WHERE id=?")
            .bind(mask_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::MaskNotFound(mask_id))?;
        if current == mtype.bits() {
            return Err(DbError::AlreadyType { id: mask_id, mtype });
        }

        sqlx::query("UPDATE masks SET type=? WHERE id=?")
            .bind(mtype.bits())
            .bind(mask_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO changes (mask_id, by_source, by_oper, time, change) VALUES (?, ?, ?, ?, ?)")
            .bind(mask_id)
            .bind(&actor.source)
            .bind(&actor.oper)
            .bind(now)
            .bind(describe)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Set or clear a mask's expiry, recording `describe` in the change
    /// log. Negative values mean "this long after the last hit".
    pub async fn set_expire(
        &self,
        actor: &Actor,
        mask_id: i64,
        expire: Option<i64>,
        describe: &str,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE masks SET expire=? WHERE id=?")
            .bind(expire)
            .bind(mask_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO changes (mask_id, by_source, by_oper, time, change) VALUES (?, ?, ?, ?, ?)")
            .bind(mask_id)
            .bind(&actor.source)
            .bind(&actor.oper)
            .bind(now)
            .bind(describe)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record a hit: bump the counter and stamp last_hit, atomically.
    pub async fn hit(&self, mask_id: i64) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE masks SET hits = hits + 1, last_hit = ? WHERE id = ?")
            .bind(now)
            .bind(mask_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// A mask's change log, oldest first.
    pub async fn changes(&self, mask_id: i64) -> Result<Vec<Change>, DbError> {
        let rows = sqlx::query_as::<_, (String, Option<String>, i64, String)>(
            r#"
            SELECT by_source, by_oper, time, change
            FROM changes
            WHERE mask_id=?
            ORDER BY time ASC, rowid ASC
            "#,
        )
        .bind(mask_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(by_source, by_oper, time, change)| Change {
                mask_id,
                by_source,
                by_oper,
                time,
                change,
            })
            .collect())
    }
}

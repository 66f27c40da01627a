use crate::types::{LedgerRecord, LedgerStats, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Durable set of links that were already delivered.
///
/// Uniqueness is enforced by the table itself (`INSERT OR IGNORE`), so
/// recording the same link twice is a no-op rather than an error.
pub struct DedupLedger {
    pool: SqlitePool,
}

impl DedupLedger {
    /// Open (or create) the ledger file at `path` in WAL mode.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        info!("Ledger opened: {}", path);
        Ok(ledger)
    }

    /// Ephemeral ledger for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                processed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_processed_at ON processed_items(processed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn is_known(&self, link: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM processed_items WHERE link = ? LIMIT 1")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Returns `true` iff a new record was inserted.
    pub async fn record(&self, link: &str, title: &str, source: &str) -> Result<bool> {
        self.insert(link, title, source, Utc::now()).await
    }

    async fn insert(&self, link: &str, title: &str, source: &str, processed_at: DateTime<Utc>) -> Result<bool> {
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_items (link, title, source, processed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(link)
        .bind(title)
        .bind(source)
        .bind(processed_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("Already in ledger: {}", link);
        }
        Ok(inserted)
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_items")
            .fetch_one(&self.pool)
            .await?;

        let last_millis: Option<i64> = sqlx::query_scalar("SELECT MAX(processed_at) FROM processed_items")
            .fetch_one(&self.pool)
            .await?;

        let by_source: HashMap<String, i64> =
            sqlx::query_as::<_, (String, i64)>("SELECT source, COUNT(*) FROM processed_items GROUP BY source")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let day_ago = (Utc::now() - Duration::hours(24)).timestamp_millis();
        let last_24h: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_items WHERE processed_at > ?")
            .bind(day_ago)
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerStats {
            total,
            last_processed_at: last_millis.and_then(DateTime::<Utc>::from_timestamp_millis),
            by_source,
            last_24h,
        })
    }

    /// Most recently delivered records first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LedgerRecord>> {
        let rows = sqlx::query(
            "SELECT link, title, source, processed_at FROM processed_items ORDER BY processed_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let millis: i64 = row.try_get("processed_at")?;
            records.push(LedgerRecord {
                link: row.try_get("link")?,
                title: row.try_get("title")?,
                source: row.try_get("source")?,
                processed_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
            });
        }
        Ok(records)
    }

    /// Delete records older than `older_than_days`. Returns how many went.
    pub async fn purge(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(i64::from(older_than_days))).timestamp_millis();

        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM processed_items WHERE processed_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if deleted > 0 {
            // VACUUM cannot run inside a transaction.
            sqlx::query("VACUUM").execute(&self.pool).await?;
            info!("Purged {} ledger records older than {} days", deleted, older_than_days);
        }

        Ok(deleted)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

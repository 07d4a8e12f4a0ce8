use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::error::RagError;
use crate::types::RagContext;

/// SQLite-backed TTL cache for built context bundles, keyed by `cache_key`.
/// Mirrors the teacher's LLM response cache: same WAL pragmas, same
/// created-at cutoff filter on read, same delete-expired-on-write sweep.
pub struct RagCache {
    conn: Arc<Mutex<Connection>>,
}

impl RagCache {
    pub async fn open(db_path: &Path) -> Result<Self, RagError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.init_schema().await?;
        Ok(cache)
    }

    pub async fn open_in_memory() -> Result<Self, RagError> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.init_schema().await?;
        Ok(cache)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rag_cache (
                cache_key  TEXT PRIMARY KEY,
                bundle     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ttl_secs   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rag_cache_created ON rag_cache(created_at);",
        )?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<RagContext>, RagError> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT bundle, created_at, ttl_secs FROM rag_cache WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        let Some((bundle, created_at, ttl_secs)) = row else {
            return Ok(None);
        };
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        if Utc::now() - created_at > chrono::Duration::seconds(ttl_secs) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&bundle)?))
    }

    pub async fn put(&self, context: &RagContext) -> Result<(), RagError> {
        let conn = self.conn.lock().await;
        let bundle = serde_json::to_string(context)?;
        conn.execute(
            "INSERT OR REPLACE INTO rag_cache (cache_key, bundle, created_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                context.cache_key,
                bundle,
                context.built_at.to_rfc3339(),
                context.ttl_secs
            ],
        )?;

        let cutoff = Utc::now() - chrono::Duration::seconds(context.ttl_secs.max(1) * 10);
        conn.execute(
            "DELETE FROM rag_cache WHERE created_at <= ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(())
    }
}

//! SQLite-backed [`KvStore`].
//!
//! One table holds every key. Strings are stored as-is, lists and hashes as
//! JSON. `expires_at` is a unix timestamp in milliseconds; rows past it are
//! invisible to every read and removed by `purge_expired`.

use crate::store::{resolve_range, KvStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use quibble_core::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const KIND_STRING: &str = "string";
const KIND_LIST: &str = "list";
const KIND_HASH: &str = "hash";

/// How long a connection waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    /// Serializes every write. SQLite allows one writer at a time, and a
    /// deferred transaction that reads before writing fails instead of waiting.
    write_lock: Arc<Mutex<()>>,
}

/// A live row as read back from the table.
struct Stored {
    kind: String,
    value: String,
    expires_at: Option<i64>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let db_url = format!("sqlite://{}?mode=rwc", path.display());

        let mut connect = SqliteConnectOptions::from_str(&db_url)
            .context("Invalid SQLite database path")?
            .busy_timeout(BUSY_TIMEOUT);
        let mut options = SqlitePoolOptions::new();
        if path == Path::new(":memory:") {
            // Every connection to ":memory:" would otherwise see its own database
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            connect = connect.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = options
            .connect_with(connect)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.migrate().await?;
        tracing::info!("SQLite store ready at {}", path.display());
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create kv table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at)")
            .execute(&self.pool)
            .await
            .context("Failed to create kv expiry index")?;

        Ok(())
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn backend(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolClosed => StorageError::Closed,
        other => StorageError::Backend(other.to_string()),
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn corrupt(key: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

async fn fetch_live(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<Stored>, StorageError> {
    let row = sqlx::query(
        "SELECT kind, value, expires_at FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(key)
    .bind(now_ms())
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;

    Ok(row.map(|r| Stored {
        kind: r.get("kind"),
        value: r.get("value"),
        expires_at: r.get("expires_at"),
    }))
}

async fn upsert(
    conn: &mut SqliteConnection,
    key: &str,
    kind: &str,
    value: &str,
    expires_at: Option<i64>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO kv (key, kind, value, expires_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value, expires_at = excluded.expires_at",
    )
    .bind(key)
    .bind(kind)
    .bind(value)
    .bind(expires_at)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(())
}

fn decode_list(key: &str, stored: Option<&Stored>) -> Result<Vec<String>, StorageError> {
    match stored {
        Some(s) if s.kind == KIND_LIST => serde_json::from_str(&s.value).map_err(|e| corrupt(key, e)),
        Some(_) => Err(wrong_type(key, KIND_LIST)),
        None => Ok(Vec::new()),
    }
}

fn decode_hash(key: &str, stored: Option<&Stored>) -> Result<BTreeMap<String, String>, StorageError> {
    match stored {
        Some(s) if s.kind == KIND_HASH => serde_json::from_str(&s.value).map_err(|e| corrupt(key, e)),
        Some(_) => Err(wrong_type(key, KIND_HASH)),
        None => Ok(BTreeMap::new()),
    }
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| corrupt(key, e))
}

// ============================================================================
// KvStore
// ============================================================================

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        match fetch_live(&mut conn, key).await? {
            Some(s) if s.kind == KIND_STRING => Ok(Some(s.value)),
            Some(_) => Err(wrong_type(key, KIND_STRING)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        upsert(&mut conn, key, KIND_STRING, value, ttl.map(deadline)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let existed = fetch_live(&mut tx, key).await?.is_some();
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(existed)
    }

    async fn increment(&self, key: &str) -> Result<i64, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let stored = fetch_live(&mut tx, key).await?;
        let (current, expires_at) = match &stored {
            Some(s) if s.kind == KIND_STRING => (
                s.value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| corrupt(key, format!("'{}' is not an integer", s.value)))?,
                s.expires_at,
            ),
            Some(_) => return Err(wrong_type(key, "integer")),
            None => (0, None),
        };
        let next = current + 1;
        upsert(&mut tx, key, KIND_STRING, &next.to_string(), expires_at).await?;
        tx.commit().await.map_err(backend)?;
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE kv SET expires_at = ? WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(deadline(ttl))
        .bind(key)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let stored = fetch_live(&mut tx, key).await?;
        let mut items = decode_list(key, stored.as_ref())?;
        items.insert(0, value.to_string());
        let expires_at = stored.and_then(|s| s.expires_at);
        upsert(&mut tx, key, KIND_LIST, &encode(key, &items)?, expires_at).await?;
        tx.commit().await.map_err(backend)?;
        Ok(items.len())
    }

    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let stored = fetch_live(&mut conn, key).await?;
        let items = decode_list(key, stored.as_ref())?;
        Ok(match resolve_range(items.len(), start, stop) {
            Some((from, to)) => items[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let stored = fetch_live(&mut tx, key).await?;
        if stored.is_none() {
            return Ok(());
        }
        let items = decode_list(key, stored.as_ref())?;
        let kept = match resolve_range(items.len(), start, stop) {
            Some((from, to)) => items[from..=to].to_vec(),
            None => Vec::new(),
        };
        if kept.is_empty() {
            sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        } else {
            let expires_at = stored.and_then(|s| s.expires_at);
            upsert(&mut tx, key, KIND_LIST, &encode(key, &kept)?, expires_at).await?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let stored = fetch_live(&mut tx, key).await?;
        let mut hash = decode_hash(key, stored.as_ref())?;
        hash.extend(fields.iter().cloned());
        let expires_at = stored.and_then(|s| s.expires_at);
        upsert(&mut tx, key, KIND_HASH, &encode(key, &hash)?, expires_at).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let stored = fetch_live(&mut conn, key).await?;
        decode_hash(key, stored.as_ref())
    }

    async fn purge_expired(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        let purged = result.rows_affected() as usize;
        if purged > 0 {
            tracing::debug!("Purged {} expired keys", purged);
        }
        Ok(purged)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        tracing::info!("SQLite store closed");
        Ok(())
    }
}

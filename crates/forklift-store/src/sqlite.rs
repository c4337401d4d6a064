//! SQLite-backed store.
//!
//! Each trait method runs inside one `IMMEDIATE` transaction, which takes the
//! database write lock up front. That makes every primitive atomic across all
//! processes that open the same file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::clock::{Clock, SystemClock, ttl_millis};
use crate::error::StoreError;
use crate::schema::init_schema;
use crate::traits::KvStore;

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

/// SQLite-based store.
pub struct SqliteKvStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteKvStore {
    /// Open (or create) a file-backed store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Unavailable(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.call(|conn| init_schema(conn)).await?;

        debug!("SqliteKvStore opened at {:?}", path);
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Create a private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.call(|conn| init_schema(conn)).await?;

        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use the given clock for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn pop_front(tx: &Transaction<'_>, key: &str, count: usize) -> rusqlite::Result<Vec<String>> {
    let rows: Vec<(i64, String)> = {
        let mut stmt =
            tx.prepare("SELECT id, value FROM kv_list WHERE key = ?1 ORDER BY id LIMIT ?2")?;
        let rows = stmt
            .query_map(params![key, sql_limit(count)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    for (id, _) in &rows {
        tx.execute("DELETE FROM kv_list WHERE id = ?1", [id])?;
    }
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

fn push_back(tx: &Transaction<'_>, key: &str, values: &[String]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare("INSERT INTO kv_list (key, value) VALUES (?1, ?2)")?;
    for value in values {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}

/// Delete every expired value. Runs on each TTL write so one-off keys such
/// as dedup records do not pile up; `idx_kv_value_expiry` keeps it cheap.
fn purge_expired(tx: &Transaction<'_>, now_ms: i64) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM kv_value WHERE expires_at_ms <= ?1", [now_ms])?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv_list (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_pop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        let popped = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let popped = pop_front(&tx, &key, count)?;
                tx.commit()?;
                Ok(popped)
            })
            .await?;
        Ok(popped)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let key = key.to_string();
        let len: i64 = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM kv_list WHERE key = ?1",
                    [&key],
                    |row| row.get(0),
                )?)
            })
            .await?;
        usize::try_from(len).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn list_move(
        &self,
        src: &str,
        dst: &str,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let (src, dst) = (src.to_string(), dst.to_string());
        let moved = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let moved = pop_front(&tx, &src, count)?;
                push_back(&tx, &dst, &moved)?;
                tx.commit()?;
                Ok(moved)
            })
            .await?;
        Ok(moved)
    }

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv_zset (key, member, score) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                    params![key, member, score],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn zset_len(&self, key: &str) -> Result<usize, StoreError> {
        let key = key.to_string();
        let len: i64 = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM kv_zset WHERE key = ?1",
                    [&key],
                    |row| row.get(0),
                )?)
            })
            .await?;
        usize::try_from(len).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn zset_move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let (src, dst) = (src.to_string(), dst.to_string());
        let moved = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let due: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT member FROM kv_zset
                         WHERE key = ?1 AND score <= ?2
                         ORDER BY score, rowid LIMIT ?3",
                    )?;
                    let members = stmt
                        .query_map(params![src, max_score, sql_limit(limit)], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    members
                };
                for member in &due {
                    tx.execute(
                        "DELETE FROM kv_zset WHERE key = ?1 AND member = ?2",
                        params![src, member],
                    )?;
                }
                push_back(&tx, &dst, &due)?;
                tx.commit()?;
                Ok(due)
            })
            .await?;
        Ok(moved)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        let now_ms = self.clock.now_millis();
        let expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));
        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                purge_expired(&tx, now_ms)?;
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO kv_value (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
                    params![key, value, expires_at_ms],
                )?;
                tx.commit()?;
                Ok(inserted == 1)
            })
            .await?;
        Ok(written)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        let now_ms = self.clock.now_millis();
        let expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                purge_expired(&tx, now_ms)?;
                tx.execute(
                    "INSERT INTO kv_value (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                    expires_at_ms = excluded.expires_at_ms",
                    params![key, value, expires_at_ms],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let now_ms = self.clock.now_millis();
        let found = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM kv_value WHERE key = ?1 AND expires_at_ms > ?2",
                        params![key, now_ms],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(found)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        let now_ms = self.clock.now_millis();
        let deleted = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM kv_value WHERE key = ?1 AND value = ?2 AND expires_at_ms > ?3",
                    params![key, value, now_ms],
                )?;
                Ok(removed == 1)
            })
            .await?;
        Ok(deleted)
    }
}

//! Database schema management.

use std::time::Duration;

use rusqlite::Connection;
use tokio_rusqlite::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize connection settings and the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Lists: ordered by insertion id, popped from the lowest id
CREATE TABLE IF NOT EXISTS kv_list (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_list_key ON kv_list(key, id);

-- Sorted sets: one row per (key, member)
CREATE TABLE IF NOT EXISTS kv_zset (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    score INTEGER NOT NULL,
    PRIMARY KEY (key, member)
);

CREATE INDEX IF NOT EXISTS idx_kv_zset_score ON kv_zset(key, score);

-- Expiring string values (locks, dedup records)
CREATE TABLE IF NOT EXISTS kv_value (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_value_expiry ON kv_value(expires_at_ms);
"#;

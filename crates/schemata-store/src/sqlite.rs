//! SQLite persistence backend using rusqlite.
//!
//! This is the durable backend used by the `schemata` CLI. Uses WAL mode by
//! default. Every call runs on tokio's blocking pool so the async runtime is
//! never stalled by disk I/O.
//!
//! # Example
//!
//! ```no_run
//! use schemata_store::{KvStore, SqliteStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = SqliteStore::open("forum.db").unwrap();
//! store.sorted_set_add("posts:pid", 1474502400000, "1").await.unwrap();
//! assert_eq!(store.sorted_set_card("posts:pid").await.unwrap(), 1);
//! # }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::traits::{KvStore, Object, Score, ScoredMember, StoreError, ValueKind};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging — allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

impl ValueKind {
    fn as_code(self) -> i64 {
        match self {
            Self::Scalar => 1,
            Self::Object => 2,
            Self::SortedSet => 3,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Scalar),
            2 => Some(Self::Object),
            3 => Some(Self::SortedSet),
            _ => None,
        }
    }
}

/// SQLite persistence backend.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex` for safe shared access.
/// Creates the schema automatically on first open.
///
/// Keys are tracked in `kv_keys` together with their kind; values live in
/// one table per kind.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(
            path = %path.display(),
            journal_mode = config.journal_mode.as_str(),
            "opening sqlite store"
        );
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_keys (
                key     TEXT PRIMARY KEY,
                kind    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_scalar (
                key     TEXT PRIMARY KEY,
                value   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_object (
                key     TEXT NOT NULL,
                field   TEXT NOT NULL,
                value   TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE TABLE IF NOT EXISTS kv_zset (
                key     TEXT NOT NULL,
                member  TEXT NOT NULL,
                score   INTEGER NOT NULL,
                PRIMARY KEY (key, member)
            );

            CREATE INDEX IF NOT EXISTS idx_zset_order
                ON kv_zset(key, score, member);",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *guard)
        })
        .await?
    }

    /// Get the current journal mode.
    pub async fn journal_mode(&self) -> Result<String, StoreError> {
        self.call(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .await
    }

    /// Get the database file size in bytes (0 for in-memory).
    pub async fn file_size(&self) -> Result<u64, StoreError> {
        self.call(|conn| {
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            Ok((page_count * page_size) as u64)
        })
        .await
    }

    /// Number of keys of each kind: `(scalars, objects, sorted sets)`.
    pub async fn key_counts(&self) -> Result<(u64, u64, u64), StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM kv_keys GROUP BY kind")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut counts = (0, 0, 0);
            for (code, count) in rows {
                match ValueKind::from_code(code) {
                    Some(ValueKind::Scalar) => counts.0 = count as u64,
                    Some(ValueKind::Object) => counts.1 = count as u64,
                    Some(ValueKind::SortedSet) => counts.2 = count as u64,
                    None => {}
                }
            }
            Ok(counts)
        })
        .await
    }
}

// ── Key bookkeeping ─────────────────────────────────────────────────

fn kind_of(conn: &Connection, key: &str) -> Result<Option<ValueKind>, StoreError> {
    let code: Option<i64> = conn
        .query_row(
            "SELECT kind FROM kv_keys WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    match code {
        None => Ok(None),
        Some(code) => ValueKind::from_code(code)
            .map(Some)
            .ok_or_else(|| StoreError::Backend(format!("unknown kind {code} for key {key:?}"))),
    }
}

/// Fail unless `key` is absent or already holds `expected`.
fn expect_kind(conn: &Connection, key: &str, expected: ValueKind) -> Result<bool, StoreError> {
    match kind_of(conn, key)? {
        None => Ok(false),
        Some(found) if found == expected => Ok(true),
        Some(found) => Err(StoreError::WrongType {
            key: key.to_string(),
            expected,
            found,
        }),
    }
}

/// Register `key` as holding `kind`, failing if it holds something else.
fn claim(conn: &Connection, key: &str, kind: ValueKind) -> Result<(), StoreError> {
    if !expect_kind(conn, key, kind)? {
        conn.execute(
            "INSERT INTO kv_keys (key, kind) VALUES (?1, ?2)",
            params![key, kind.as_code()],
        )?;
    }
    Ok(())
}

fn purge(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    conn.execute("DELETE FROM kv_scalar WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM kv_object WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM kv_zset WHERE key = ?1", params![key])?;
    let removed = conn.execute("DELETE FROM kv_keys WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

/// Drop the key entry once its object or sorted set has no rows left.
fn release_if_empty(conn: &Connection, key: &str, kind: ValueKind) -> Result<(), StoreError> {
    let remaining: i64 = match kind {
        ValueKind::Object => conn.query_row(
            "SELECT COUNT(*) FROM kv_object WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?,
        ValueKind::SortedSet => conn.query_row(
            "SELECT COUNT(*) FROM kv_zset WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?,
        ValueKind::Scalar => return Ok(()),
    };
    if remaining == 0 {
        conn.execute("DELETE FROM kv_keys WHERE key = ?1", params![key])?;
    }
    Ok(())
}

fn scored_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<ScoredMember>, StoreError> {
    let rows = stmt
        .query_map(params, |row| {
            Ok(ScoredMember {
                member: row.get(0)?,
                score: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn kind(&self, key: &str) -> Result<Option<ValueKind>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| kind_of(conn, &key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let removed = purge(&tx, &key)?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if kind_of(&tx, &from)?.is_none() {
                return Ok(false);
            }
            if from != to {
                purge(&tx, &to)?;
                for table in ["kv_keys", "kv_scalar", "kv_object", "kv_zset"] {
                    tx.execute(
                        &format!("UPDATE {table} SET key = ?2 WHERE key = ?1"),
                        params![from, to],
                    )?;
                }
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let prefix = prefix.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let matches = "substr(key, 1, length(?1)) = ?1";
            for table in ["kv_scalar", "kv_object", "kv_zset"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE {matches}"),
                    params![prefix],
                )?;
            }
            let removed = tx.execute(
                &format!("DELETE FROM kv_keys WHERE {matches}"),
                params![prefix],
            )?;
            tx.commit()?;
            debug!(%prefix, removed, "deleted keys by prefix");
            Ok(removed as u64)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::Scalar)? {
                return Ok(None);
            }
            Ok(conn
                .query_row(
                    "SELECT value FROM kv_scalar WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            claim(&tx, &key, ValueKind::Scalar)?;
            tx.execute(
                "INSERT INTO kv_scalar (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_object(&self, key: &str) -> Result<Option<Object>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::Object)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare("SELECT field, value FROM kv_object WHERE key = ?1")?;
            let obj = stmt
                .query_map(params![key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Object, _>>()?;
            Ok(Some(obj))
        })
        .await
    }

    async fn get_object_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::Object)? {
                return Ok(None);
            }
            Ok(conn
                .query_row(
                    "SELECT value FROM kv_object WHERE key = ?1 AND field = ?2",
                    params![key, field],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set_object(&self, key: &str, fields: &Object) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let (key, fields) = (key.to_string(), fields.clone());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            claim(&tx, &key, ValueKind::Object)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO kv_object (key, field, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                )?;
                for (field, value) in &fields {
                    stmt.execute(params![key, field, value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_object_field(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if !expect_kind(&tx, &key, ValueKind::Object)? {
                return Ok(false);
            }
            let removed = tx.execute(
                "DELETE FROM kv_object WHERE key = ?1 AND field = ?2",
                params![key, field],
            )?;
            release_if_empty(&tx, &key, ValueKind::Object)?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn incr_object_field(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            claim(&tx, &key, ValueKind::Object)?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT value FROM kv_object WHERE key = ?1 AND field = ?2",
                    params![key, field],
                    |row| row.get(0),
                )
                .optional()?;
            let current = match current {
                None => 0,
                Some(value) => value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                    key: key.clone(),
                    field: field.clone(),
                    value,
                })?,
            };
            let next = current.checked_add(by).ok_or_else(|| StoreError::Overflow {
                key: key.clone(),
                field: field.clone(),
            })?;
            tx.execute(
                "INSERT INTO kv_object (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                params![key, field, next.to_string()],
            )?;
            tx.commit()?;
            Ok(next)
        })
        .await
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        score: Score,
        member: &str,
    ) -> Result<bool, StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            claim(&tx, &key, ValueKind::SortedSet)?;
            let existed: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM kv_zset WHERE key = ?1 AND member = ?2)",
                params![key, member],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO kv_zset (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )?;
            tx.commit()?;
            Ok(!existed)
        })
        .await
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if !expect_kind(&tx, &key, ValueKind::SortedSet)? {
                return Ok(false);
            }
            let removed = tx.execute(
                "DELETE FROM kv_zset WHERE key = ?1 AND member = ?2",
                params![key, member],
            )?;
            release_if_empty(&tx, &key, ValueKind::SortedSet)?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::SortedSet)? {
                return Ok(None);
            }
            Ok(conn
                .query_row(
                    "SELECT score FROM kv_zset WHERE key = ?1 AND member = ?2",
                    params![key, member],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::SortedSet)? {
                return Ok(0);
            }
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv_zset WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn sorted_set_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::SortedSet)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT member, score FROM kv_zset WHERE key = ?1
                 ORDER BY score ASC, member ASC LIMIT ?2 OFFSET ?3",
            )?;
            scored_rows(&mut stmt, params![key, sql_limit(limit), sql_limit(offset)])
        })
        .await
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::SortedSet)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT member, score FROM kv_zset WHERE key = ?1
                 ORDER BY score DESC, member DESC LIMIT ?2 OFFSET ?3",
            )?;
            scored_rows(&mut stmt, params![key, sql_limit(limit), sql_limit(offset)])
        })
        .await
    }

    async fn sorted_set_range_after(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let key = key.to_string();
        let after = after.cloned();
        self.call(move |conn| {
            if !expect_kind(conn, &key, ValueKind::SortedSet)? {
                return Ok(Vec::new());
            }
            match after {
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT member, score FROM kv_zset WHERE key = ?1
                         ORDER BY score ASC, member ASC LIMIT ?2",
                    )?;
                    scored_rows(&mut stmt, params![key, sql_limit(limit)])
                }
                Some(cursor) => {
                    let mut stmt = conn.prepare(
                        "SELECT member, score FROM kv_zset
                         WHERE key = ?1 AND (score > ?2 OR (score = ?2 AND member > ?3))
                         ORDER BY score ASC, member ASC LIMIT ?4",
                    )?;
                    scored_rows(
                        &mut stmt,
                        params![key, cursor.score, cursor.member, sql_limit(limit)],
                    )
                }
            }
        })
        .await
    }
}

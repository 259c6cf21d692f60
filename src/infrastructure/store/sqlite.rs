//! SQLite 列表存储实现
//!
//! 使用 SQLite 作为后端，适合需要跨进程重启保留会话的场景。
//! 每个键的元素按自增序号排列，过期时间以毫秒时间戳保存，由注入的时钟判断。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::clock::{Clock, SystemClock};
use crate::core::store::{head_matches, normalize_range, ListStore};
use crate::errors::{Fault, Result};

/// SQLite 列表存储
pub struct SqliteListStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteListStore {
    /// 打开（或创建）数据库文件
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Fault::storage_unavailable("open", e).with_context("path", path.display().to_string())
        })?;
        Self::from_connection(conn)
    }

    /// 创建内存数据库（用于测试）
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Fault::storage_unavailable("open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// 使用指定时钟判断过期
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 初始化数据库表结构
    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Fault::storage_unavailable("init_schema", e))?;

        conn.execute_batch(
            "
            -- 列表元素
            CREATE TABLE IF NOT EXISTS list_items (
                key TEXT NOT NULL,
                seq INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, seq)
            );

            -- 键的过期时间（毫秒）
            CREATE TABLE IF NOT EXISTS list_keys (
                key TEXT PRIMARY KEY,
                expires_at INTEGER
            );
            ",
        )?;

        Ok(())
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// 在阻塞线程池中执行数据库操作，执行前先清理该键的过期数据
    async fn execute<F, T>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let key = key.to_string();
        let now = self.now_ms();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| Fault::storage_unavailable("lock", e))?;
            evict_expired(&conn, &key, now)?;
            f(&mut conn, &key)
        })
        .await
        .map_err(|e| Fault::storage("spawn_blocking", e))?
    }
}

fn evict_expired(conn: &Connection, key: &str, now: i64) -> Result<()> {
    let expired: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM list_keys WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now],
            |row| row.get(0),
        )
        .optional()?;
    if expired.is_some() {
        conn.execute("DELETE FROM list_items WHERE key = ?1", params![key])?;
        conn.execute("DELETE FROM list_keys WHERE key = ?1", params![key])?;
    }
    Ok(())
}

fn count(conn: &Connection, key: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM list_items WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

fn values(conn: &Connection, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT value FROM list_items WHERE key = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[async_trait]
impl ListStore for SqliteListStore {
    async fn push(&self, key: &str, value: String) -> Result<usize> {
        self.execute(key, move |conn, key| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO list_keys (key, expires_at) VALUES (?1, NULL)",
                params![key],
            )?;
            tx.execute(
                "INSERT INTO list_items (key, seq, value)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM list_items WHERE key = ?1), ?2)",
                params![key, value],
            )?;
            let len = count(&tx, key)?;
            tx.commit()?;
            Ok(len)
        })
        .await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.execute(key, move |conn, key| {
            let items = values(conn, key)?;
            Ok(match normalize_range(items.len(), start, stop) {
                Some((from, to)) => items[from..to].to_vec(),
                None => Vec::new(),
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.execute(key, |conn, key| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM list_items WHERE key = ?1", params![key])?;
            tx.execute("DELETE FROM list_keys WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let expires_at = self.now_ms().saturating_add(ttl.as_millis() as i64);
        self.execute(key, move |conn, key| {
            if count(conn, key)? == 0 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO list_keys (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                params![key, expires_at],
            )?;
            Ok(true)
        })
        .await
    }

    async fn len(&self, key: &str) -> Result<usize> {
        self.execute(key, |conn, key| count(conn, key)).await
    }

    async fn replace_head(
        &self,
        key: &str,
        expected: Vec<String>,
        replacement: Vec<String>,
    ) -> Result<bool> {
        self.execute(key, move |conn, key| {
            let tx = conn.transaction()?;
            let items = values(&tx, key)?;
            if items.is_empty() || !head_matches(&items, &expected) {
                return Ok(false);
            }
            let rewritten: Vec<String> = replacement
                .into_iter()
                .chain(items.into_iter().skip(expected.len()))
                .collect();

            tx.execute("DELETE FROM list_items WHERE key = ?1", params![key])?;
            if rewritten.is_empty() {
                tx.execute("DELETE FROM list_keys WHERE key = ?1", params![key])?;
            } else {
                let mut stmt =
                    tx.prepare("INSERT INTO list_items (key, seq, value) VALUES (?1, ?2, ?3)")?;
                for (i, value) in rewritten.iter().enumerate() {
                    stmt.execute(params![key, (i + 1) as i64, value])?;
                }
                drop(stmt);
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[tokio::test]
    async fn test_push_range_and_len() {
        let store = SqliteListStore::open_in_memory().unwrap();
        for v in ["a", "b", "c"] {
            store.push("k", v.into()).await.unwrap();
        }
        assert_eq!(store.len("k").await.unwrap(), 3);
        assert_eq!(store.range("k", 1, -1).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SqliteListStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());

        store.push("k", "a".into()).await.unwrap();
        assert!(store.expire("k", Duration::from_secs(60)).await.unwrap());
        clock.advance_secs(61);
        assert_eq!(store.len("k").await.unwrap(), 0);
    }
}

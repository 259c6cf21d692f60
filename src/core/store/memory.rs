//! 内存列表存储实现
//!
//! 默认的存储实现，数据仅在内存中，重启后丢失。过期由注入的时钟驱动。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::clock::{Clock, SystemClock};
use crate::errors::{Fault, Result};

use super::{head_matches, normalize_range, ListStore};

struct ListEntry {
    items: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// 内存列表存储
///
/// 每个原语在一次写锁内完成，因此对并发调用是原子的
pub struct MemoryListStore {
    lists: RwLock<HashMap<String, ListEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryListStore {
    /// 使用系统时钟
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 使用指定时钟
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// 移除已过期的键
    fn evict_expired(&self, lists: &mut HashMap<String, ListEntry>, key: &str) {
        let now = self.clock.now();
        let expired = lists
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            lists.remove(key);
        }
    }
}

impl Default for MemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push(&self, key: &str, value: String) -> Result<usize> {
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        let entry = lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: Vec::new(),
            expires_at: None,
        });
        entry.items.push(value);
        Ok(entry.items.len())
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        let Some(entry) = lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(entry.items.len(), start, stop) {
            Some((from, to)) => entry.items[from..to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        Ok(lists.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Fault::storage("expire", format!("invalid ttl: {}", e)))?;
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        let now = self.clock.now();
        match lists.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        Ok(lists.get(key).map(|e| e.items.len()).unwrap_or(0))
    }

    async fn replace_head(
        &self,
        key: &str,
        expected: Vec<String>,
        replacement: Vec<String>,
    ) -> Result<bool> {
        let mut lists = self.lists.write().await;
        self.evict_expired(&mut lists, key);
        let Some(entry) = lists.get_mut(key) else {
            return Ok(false);
        };
        if !head_matches(&entry.items, &expected) {
            return Ok(false);
        }
        entry.items.splice(..expected.len(), replacement);
        if entry.items.is_empty() {
            lists.remove(key);
        }
        Ok(true)
    }
}

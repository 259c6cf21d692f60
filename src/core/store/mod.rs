//! 列表存储接口定义
//!
//! 上下文持久化只依赖五个原语（尾部追加、区间读取、整键删除、
//! 按秒过期、长度查询）以及实现高水位裁剪的头部原子重写。
//! 提供任何满足这些原语的后端都可以替换。

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

pub mod memory;

pub use memory::MemoryListStore;

/// 有序列表存储
#[async_trait]
pub trait ListStore: Send + Sync {
    /// 原子地追加到尾部，返回追加后的长度
    async fn push(&self, key: &str, value: String) -> Result<usize>;

    /// 读取闭区间 `[start, stop]`，负数下标从尾部计数（-1 为最后一个）
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// 删除整个键，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 设置键在 `ttl` 后过期，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 列表长度，键不存在时为 0
    async fn len(&self, key: &str) -> Result<usize>;

    /// 条件头部重写：仅当列表当前的前 `expected.len()` 个元素与 `expected`
    /// 完全一致时，原子地把它们替换为 `replacement`，其后的元素保持不变。
    ///
    /// 头部已被其他操作改动（或键已不存在）时不做任何修改并返回 false
    async fn replace_head(
        &self,
        key: &str,
        expected: Vec<String>,
        replacement: Vec<String>,
    ) -> Result<bool>;
}

/// 头部是否仍与快照一致
pub fn head_matches(items: &[String], expected: &[String]) -> bool {
    items.len() >= expected.len() && items[..expected.len()] == *expected
}

/// 把闭区间下标规范化为 `[from, to)`，区间为空时返回 None
pub fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let resolve = |idx: i64| if idx < 0 { len_i + idx } else { idx };

    let from = resolve(start).max(0);
    let to = resolve(stop).min(len_i - 1);
    if from > to || from >= len_i {
        return None;
    }
    Some((from as usize, to as usize + 1))
}

//! 共享会话上下文
//!
//! 所有客户端共享一条按追加顺序排列的消息日志。整条日志只有一个过期期限，
//! 每次追加都会把期限重置为 now + TTL：空闲超过 TTL 的会话整体消失，
//! 持续活跃的会话永不过期。
//!
//! 后端不可达时每个操作都返回存储故障，不做内存回退。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::prompt::ChatTemplate;
use crate::core::store::ListStore;
use crate::domain::{Message, Metadata, Role};
use crate::errors::{Fault, FaultKind, Result};

/// 默认键前缀
pub const DEFAULT_KEY_PREFIX: &str = "hivemind:context";

/// 默认 TTL：7 天
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// 裁剪遇到并发改动时的最大尝试次数
const PRUNE_ATTEMPTS: usize = 8;

/// 读取选项
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadOptions {
    /// 只保留最近的 N 条（在 since 过滤之后）
    pub limit: Option<usize>,
    /// 只保留时间戳 >= since 的消息
    pub since: Option<DateTime<Utc>>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }
}

/// 会话上下文存储
pub struct ContextStore {
    store: Arc<dyn ListStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key: String,
    template: ChatTemplate,
}

impl ContextStore {
    /// 使用默认前缀、TTL 和系统时钟
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_TTL,
            key: messages_key(DEFAULT_KEY_PREFIX),
            template: ChatTemplate::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key = messages_key(prefix);
        self
    }

    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    /// 追加消息并重置整条日志的过期期限
    pub async fn append(
        &self,
        role: Role,
        content: &str,
        client_id: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Message> {
        let mut message = Message::new(role, content, self.clock.now());
        message.client_id = client_id.map(str::to_string);
        message.metadata = metadata.unwrap_or_default();

        let raw = message.to_json().map_err(|e| {
            Fault::unexpected(FaultKind::Context, "Failed to add message", &e)
                .with_context("role", role.as_str())
                .with_context("content_length", content.len())
        })?;

        let len = self.store.push(&self.key, raw).await?;
        self.store.expire(&self.key, self.ttl).await?;

        debug!(role = %role, len, "Appended message to shared context");
        Ok(message)
    }

    /// 按时间顺序读取消息
    pub async fn read(&self, options: ReadOptions) -> Result<Vec<Message>> {
        if options.limit == Some(0) {
            return Ok(Vec::new());
        }

        // 没有 since 过滤时只读尾部区间；超出 i64 的 limit 等同于不限
        let start = match (options.since, options.limit) {
            (None, Some(limit)) => i64::try_from(limit).map(|l| -l).unwrap_or(0),
            _ => 0,
        };
        let raw = self.store.range(&self.key, start, -1).await?;
        let mut messages = decode_all(&raw);

        // 尾部窗口里有损坏条目时退回完整读取，用更早的消息补足
        if start != 0 && messages.len() < raw.len() {
            let raw = self.store.range(&self.key, 0, -1).await?;
            messages = decode_all(&raw);
        }

        if let Some(since) = options.since {
            messages.retain(|m| m.timestamp >= since);
        }
        if let Some(limit) = options.limit {
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
        }
        Ok(messages)
    }

    /// 当前消息数量
    pub async fn size(&self) -> Result<usize> {
        self.store.len(&self.key).await
    }

    /// 删除整个会话
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await?;
        debug!(key = %self.key, "Cleared shared context");
        Ok(())
    }

    /// 删除时间戳早于 `before` 的消息，返回删除数量
    ///
    /// 先读取快照，再以快照为期望头部做条件重写；快照之后追加的消息不受影响。
    /// 头部在此期间被其他操作改动时重新读取快照再试。
    pub async fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        for attempt in 1..=PRUNE_ATTEMPTS {
            let snapshot = self.store.range(&self.key, 0, -1).await?;
            let high_water = snapshot.len();

            let kept: Vec<String> = snapshot
                .iter()
                .filter(|entry| decode(entry).is_some_and(|m| m.timestamp >= before))
                .cloned()
                .collect();

            let removed = high_water - kept.len();
            if removed == 0 {
                return Ok(0);
            }

            if self.store.replace_head(&self.key, snapshot, kept).await? {
                debug!(removed, high_water, "Pruned shared context");
                return Ok(removed);
            }
            debug!(attempt, "Context head changed during prune, retrying");
        }

        Err(Fault::context_fault(format!(
            "Prune abandoned after {} conflicting attempts",
            PRUNE_ATTEMPTS
        ))
        .with_context("operation", "prune"))
    }

    /// 渲染为生成脚本
    pub async fn render(&self, limit: Option<usize>, system_prompt: Option<&str>) -> Result<String> {
        let options = ReadOptions {
            limit,
            since: None,
        };
        let messages = self.read(options).await?;
        Ok(self.template.render(&messages, system_prompt))
    }
}

fn messages_key(prefix: &str) -> String {
    format!("{}:messages", prefix)
}

fn decode_all(raw: &[String]) -> Vec<Message> {
    raw.iter().filter_map(|entry| decode(entry)).collect()
}

fn decode(entry: &str) -> Option<Message> {
    match Message::from_json(entry) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "Skipping corrupt context entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::store::MemoryListStore;

    fn setup() -> (Arc<ManualClock>, Arc<MemoryListStore>, ContextStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(MemoryListStore::with_clock(clock.clone()));
        let context = ContextStore::new(backend.clone())
            .with_clock(clock.clone())
            .with_ttl(Duration::from_secs(3600));
        (clock, backend, context)
    }

    #[tokio::test]
    async fn test_key_uses_prefix() {
        let (_, backend, _) = setup();
        let context = ContextStore::new(backend).with_key_prefix("test");
        assert_eq!(context.key(), "test:messages");
    }

    #[tokio::test]
    async fn test_corrupt_entries_are_skipped() {
        let (_, backend, context) = setup();
        context.append(Role::User, "one", None, None).await.unwrap();
        backend.push(context.key(), "{garbage".into()).await.unwrap();
        context.append(Role::User, "two", None, None).await.unwrap();

        let messages = context.read(ReadOptions::new()).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_corrupt_tail_is_backfilled() {
        let (_, backend, context) = setup();
        context.append(Role::User, "one", None, None).await.unwrap();
        context.append(Role::User, "two", None, None).await.unwrap();
        backend.push(context.key(), "{garbage".into()).await.unwrap();

        let messages = context.read(ReadOptions::new().limit(2)).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_huge_limit_reads_everything() {
        let (_, _, context) = setup();
        for text in ["a", "b", "c"] {
            context.append(Role::User, text, None, None).await.unwrap();
        }
        for limit in [usize::MAX, 1 << 63] {
            let messages = context.read(ReadOptions::new().limit(limit)).await.unwrap();
            let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn test_limit_zero_is_empty() {
        let (_, _, context) = setup();
        context.append(Role::User, "one", None, None).await.unwrap();
        assert!(context.read(ReadOptions::new().limit(0)).await.unwrap().is_empty());
    }
}

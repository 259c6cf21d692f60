//! 意图分发
//!
//! 在注册表之上施加调用方超时，并把生成引擎给出的 JSON 调用解析成意图

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::registry::ExtensionRegistry;
use crate::domain::{ExtensionOutput, Params};
use crate::errors::{Fault, Result};
use crate::infrastructure::logger::{Timer, TurnContext};

/// 一次扩展调用
#[derive(Debug, Clone, PartialEq)]
pub struct IntentCall {
    pub plugin: String,
    pub intent: String,
    pub params: Params,
}

impl IntentCall {
    pub fn new(plugin: impl Into<String>, intent: impl Into<String>, params: Params) -> Self {
        Self {
            plugin: plugin.into(),
            intent: intent.into(),
            params,
        }
    }

    /// 从生成文本中提取 `{"plugin": .., "intent": .., "params": {..}}`
    ///
    /// 允许 JSON 前后带有其他文字（例如代码块标记）。不是调用时返回 `None`。
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }

        let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
        let object = value.as_object()?;

        let plugin = object.get("plugin")?.as_str()?.trim();
        let intent = object.get("intent")?.as_str()?.trim();
        if plugin.is_empty() || intent.is_empty() {
            return None;
        }

        let params = match object.get("params") {
            None | Some(Value::Null) => Params::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return None,
        };

        Some(Self::new(plugin, intent, params))
    }
}

/// 带超时的分发器
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ExtensionRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ExtensionRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 分发一次调用，超时转换为插件执行故障
    pub async fn dispatch(&self, plugin: &str, intent: &str, params: Params) -> Result<ExtensionOutput> {
        let _timer = Timer::new(format!("dispatch:{}:{}", plugin, intent));
        self.run(plugin, intent, params).await
    }

    /// 在某个用户轮次内分发
    pub async fn dispatch_in_turn(&self, call: &IntentCall, turn: &TurnContext) -> Result<ExtensionOutput> {
        let _timer = Timer::new(format!("dispatch:{}:{}", call.plugin, call.intent)).with_turn(turn);
        self.run(&call.plugin, &call.intent, call.params.clone()).await
    }

    /// 并发分发多次调用，结果与输入顺序一致
    pub async fn dispatch_many(&self, calls: &[IntentCall]) -> Vec<Result<ExtensionOutput>> {
        join_all(
            calls
                .iter()
                .map(|call| self.dispatch(&call.plugin, &call.intent, call.params.clone())),
        )
        .await
    }

    async fn run(&self, plugin: &str, intent: &str, params: Params) -> Result<ExtensionOutput> {
        debug!("Dispatching {}::{} with timeout {:?}", plugin, intent, self.timeout);
        match tokio::time::timeout(self.timeout, self.registry.dispatch(plugin, intent, params)).await {
            Ok(result) => result,
            Err(_) => {
                let fault = Fault::plugin_timeout(plugin, intent, self.timeout.as_millis());
                warn!("{}", fault);
                Err(fault)
            }
        }
    }
}
